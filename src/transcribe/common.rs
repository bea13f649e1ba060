use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{DubError, Result};

/// One recognized speech segment. Built once from a completed
/// transcription payload and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: String,
    pub text: String,
    /// Milliseconds from the start of the audio.
    pub start: u64,
    pub end: u64,
    pub confidence: f64,
    pub words: Vec<Word>,
    /// Declared default, not an inferred property; the service provides
    /// no gender signal.
    pub gender: String,
}

/// Word-level annotation within an utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub start: u64,
    pub end: u64,
    pub confidence: f64,
}

/// Derived per-speaker information for one transcription result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerProfile {
    pub gender: String,
    /// 1-based rank in the sorted distinct speaker-id set.
    pub order: u32,
}

/// Derive speaker profiles from the distinct speaker ids of a result.
pub fn speaker_profiles(
    speaker_ids: impl IntoIterator<Item = String>,
    default_gender: &str,
) -> BTreeMap<String, SpeakerProfile> {
    let distinct: std::collections::BTreeSet<String> = speaker_ids.into_iter().collect();
    distinct
        .into_iter()
        .enumerate()
        .map(|(index, id)| {
            (
                id,
                SpeakerProfile {
                    gender: default_gender.to_string(),
                    order: index as u32 + 1,
                },
            )
        })
        .collect()
}

/// Status of an asynchronous transcription job as reported by the
/// service. Anything unrecognized is carried verbatim and treated as
/// non-terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
    Other(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "queued" => Self::Queued,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Bounded polling schedule for the job status loop.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Wait mechanism behind the poll loop, injectable so tests can run
/// the state machine without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Raw status payload of the transcription job endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptPayload {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub utterances: Option<Vec<RawUtterance>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Seconds, as reported by the service.
    #[serde(default)]
    pub audio_duration: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub words: Option<Vec<RawWord>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUtterance {
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub end: Option<u64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub words: Option<Vec<RawWord>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawWord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub end: u64,
    #[serde(default)]
    pub confidence: f64,
}

impl From<RawWord> for Word {
    fn from(raw: RawWord) -> Self {
        Self {
            text: raw.text,
            start: raw.start,
            end: raw.end,
            confidence: raw.confidence,
        }
    }
}

/// Drive the poll state machine until a terminal state or the attempt
/// ceiling. `fetch_status` performs one status request; transport
/// failures there are transient and only consume attempts, while a
/// service-reported `error` status is fatal.
pub async fn poll_until_complete<F, Fut>(
    policy: PollPolicy,
    sleeper: &dyn Sleeper,
    mut fetch_status: F,
) -> Result<TranscriptPayload>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TranscriptPayload>>,
{
    let mut attempts = 0u32;

    while attempts < policy.max_attempts {
        attempts += 1;

        match fetch_status().await {
            Ok(payload) => {
                let status = JobStatus::parse(&payload.status);
                debug!(
                    "Polling attempt {}/{}: status = {}",
                    attempts, policy.max_attempts, payload.status
                );

                match status {
                    JobStatus::Completed => return Ok(payload),
                    JobStatus::Error => {
                        let message = payload
                            .error
                            .unwrap_or_else(|| "unknown error during transcription".to_string());
                        return Err(DubError::Transcription(format!(
                            "transcription job failed: {}",
                            message
                        )));
                    }
                    JobStatus::Queued | JobStatus::Processing => {
                        sleeper.sleep(policy.interval).await;
                    }
                    JobStatus::Other(raw) => {
                        warn!("Unknown transcription status received: {}", raw);
                        sleeper.sleep(policy.interval).await;
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Transport error during polling (attempt {}): {}. Retrying...",
                    attempts, e
                );
                sleeper.sleep(policy.interval * 2).await;
            }
        }
    }

    Err(DubError::Transcription(format!(
        "transcription job did not complete after {} polling attempts",
        policy.max_attempts
    )))
}

/// Map a completed payload into utterances, covering the degraded
/// shapes the service can return: per-speaker segments when
/// diarization produced them, otherwise a single utterance spanning
/// the reported audio duration, otherwise nothing.
pub fn map_completed_payload(payload: TranscriptPayload, default_gender: &str) -> Vec<Utterance> {
    let audio_duration_ms = (payload.audio_duration.unwrap_or(0.0) * 1000.0) as u64;

    if let Some(raw_utterances) = payload.utterances.filter(|u| !u.is_empty()) {
        let profiles = speaker_profiles(
            raw_utterances
                .iter()
                .filter_map(|u| u.speaker.clone()),
            default_gender,
        );

        let utterances: Vec<Utterance> = raw_utterances
            .into_iter()
            .map(|raw| {
                let speaker = raw.speaker.unwrap_or_else(|| "Unknown".to_string());
                let gender = profiles
                    .get(&speaker)
                    .map(|p| p.gender.clone())
                    .unwrap_or_else(|| default_gender.to_string());
                Utterance {
                    speaker,
                    text: raw.text.unwrap_or_default(),
                    start: raw.start.unwrap_or(0),
                    end: raw.end.unwrap_or(0),
                    confidence: raw.confidence.unwrap_or(0.0),
                    words: raw
                        .words
                        .unwrap_or_default()
                        .into_iter()
                        .map(Word::from)
                        .collect(),
                    gender,
                }
            })
            .collect();

        if !utterances.is_empty() {
            return utterances;
        }
    }

    // No speaker segmentation: fall back to one utterance over the
    // whole flat transcript, if there is one.
    match payload.text.filter(|t| !t.trim().is_empty()) {
        Some(text) => vec![Utterance {
            speaker: "A".to_string(),
            text,
            start: 0,
            end: audio_duration_ms,
            confidence: payload.confidence.unwrap_or(1.0),
            words: payload
                .words
                .unwrap_or_default()
                .into_iter()
                .map(Word::from)
                .collect(),
            gender: default_gender.to_string(),
        }],
        None => {
            warn!("Transcription completed but contained no utterances and no text");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Records requested sleeps instead of waiting.
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn new() -> Self {
            Self {
                sleeps: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    fn policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(5),
            max_attempts,
        }
    }

    fn payload_with_status(status: &str) -> TranscriptPayload {
        TranscriptPayload {
            status: status.to_string(),
            text: Some("done text".to_string()),
            audio_duration: Some(12.0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_poll_terminates_on_completed() {
        let statuses = ["queued", "processing", "processing", "completed"];
        let calls = AtomicU32::new(0);
        let sleeper = RecordingSleeper::new();

        let payload = poll_until_complete(policy(720), &sleeper, || {
            let index = calls.fetch_add(1, Ordering::SeqCst) as usize;
            let payload = payload_with_status(statuses[index]);
            async move { Ok(payload) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(payload.status, "completed");
        // Three non-terminal polls, one sleep each.
        assert_eq!(sleeper.sleeps.lock().unwrap().len(), 3);

        let utterances = map_completed_payload(payload, "male");
        assert_eq!(utterances.len(), 1);
        assert_eq!(utterances[0].text, "done text");
    }

    #[tokio::test]
    async fn test_poll_times_out_at_attempt_ceiling() {
        let calls = AtomicU32::new(0);
        let sleeper = RecordingSleeper::new();

        let err = poll_until_complete(policy(7), &sleeper, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(payload_with_status("processing")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 7);
        match err {
            DubError::Transcription(message) => {
                assert!(message.contains("did not complete after 7"));
            }
            other => panic!("expected transcription error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poll_error_status_is_fatal() {
        let sleeper = RecordingSleeper::new();
        let err = poll_until_complete(policy(720), &sleeper, || async {
            Ok(TranscriptPayload {
                status: "error".to_string(),
                error: Some("audio unreadable".to_string()),
                ..Default::default()
            })
        })
        .await
        .unwrap_err();

        match err {
            DubError::Transcription(message) => assert!(message.contains("audio unreadable")),
            other => panic!("expected transcription error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_errors_back_off_and_count_attempts() {
        let calls = AtomicU32::new(0);
        let sleeper = RecordingSleeper::new();

        let payload = poll_until_complete(policy(720), &sleeper, || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(DubError::Transcription("connection reset".to_string()))
                } else {
                    Ok(payload_with_status("completed"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(payload.status, "completed");
        let sleeps = sleeper.sleeps.lock().unwrap();
        // The transport failure sleeps twice the normal interval.
        assert_eq!(sleeps.as_slice(), &[Duration::from_secs(10)]);
    }

    #[tokio::test]
    async fn test_unknown_status_is_non_terminal() {
        let calls = AtomicU32::new(0);
        let sleeper = RecordingSleeper::new();

        let payload = poll_until_complete(policy(720), &sleeper, || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Ok(payload_with_status("throttled"))
                } else {
                    Ok(payload_with_status("completed"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(payload.status, "completed");
    }

    #[test]
    fn test_speaker_profiles_order_by_sorted_id() {
        let profiles = speaker_profiles(
            ["B", "A", "B", "C", "A"].iter().map(|s| s.to_string()),
            "male",
        );
        assert_eq!(profiles.len(), 3);
        assert_eq!(profiles["A"].order, 1);
        assert_eq!(profiles["B"].order, 2);
        assert_eq!(profiles["C"].order, 3);
        assert!(profiles.values().all(|p| p.gender == "male"));
    }

    #[test]
    fn test_map_payload_with_diarized_utterances() {
        let payload = TranscriptPayload {
            status: "completed".to_string(),
            utterances: Some(vec![
                RawUtterance {
                    speaker: Some("B".to_string()),
                    text: Some("Second speaker".to_string()),
                    start: Some(1000),
                    end: Some(2000),
                    confidence: Some(0.9),
                    words: None,
                },
                RawUtterance {
                    speaker: Some("A".to_string()),
                    text: Some("First speaker".to_string()),
                    start: Some(0),
                    end: Some(1000),
                    confidence: Some(0.8),
                    words: None,
                },
            ]),
            ..Default::default()
        };

        let utterances = map_completed_payload(payload, "male");
        assert_eq!(utterances.len(), 2);
        assert_eq!(utterances[0].speaker, "B");
        assert_eq!(utterances[1].speaker, "A");
        assert!(utterances.iter().all(|u| u.gender == "male"));
    }

    #[test]
    fn test_map_payload_falls_back_to_flat_text() {
        let payload = TranscriptPayload {
            status: "completed".to_string(),
            utterances: Some(Vec::new()),
            text: Some("whole transcript".to_string()),
            audio_duration: Some(42.5),
            ..Default::default()
        };

        let utterances = map_completed_payload(payload, "male");
        assert_eq!(utterances.len(), 1);
        assert_eq!(utterances[0].speaker, "A");
        assert_eq!(utterances[0].end, 42_500);
    }

    #[test]
    fn test_map_payload_empty_result() {
        let payload = TranscriptPayload {
            status: "completed".to_string(),
            ..Default::default()
        };
        assert!(map_completed_payload(payload, "male").is_empty());
    }
}
