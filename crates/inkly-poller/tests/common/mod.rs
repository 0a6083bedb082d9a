//! Shared fixtures for poller integration tests.

use std::collections::VecDeque;
use std::future::{Future, ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use inkly_core::{GenerationState, GenerationStatus, Job};
use inkly_poller::{CancelHandle, GenerationApi, PollerConfig, Sleeper};
use inkly_protocol::{ClientError, GenerationAck};

/// Scripted server: one start answer, then queued status answers.
///
/// An exhausted status queue keeps answering `running`.
#[derive(Debug)]
pub struct ScriptedApi {
    start: Mutex<Option<Result<GenerationAck, ClientError>>>,
    statuses: Mutex<VecDeque<Result<GenerationStatus, ClientError>>>,
    starts: AtomicU32,
    polls: AtomicU32,
}

#[allow(dead_code)]
impl ScriptedApi {
    pub fn new(statuses: Vec<Result<GenerationStatus, ClientError>>) -> Arc<Self> {
        Self::with_start(
            Ok(GenerationAck {
                job_id: "abc".to_string(),
                state: GenerationState::Running,
            }),
            statuses,
        )
    }

    pub fn with_start(
        start: Result<GenerationAck, ClientError>,
        statuses: Vec<Result<GenerationStatus, ClientError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            start: Mutex::new(Some(start)),
            statuses: Mutex::new(statuses.into()),
            starts: AtomicU32::new(0),
            polls: AtomicU32::new(0),
        })
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

impl GenerationApi for ScriptedApi {
    fn start_generation(
        &self,
        _filename: &str,
        _job_id: &str,
        _lambdas: [f64; 5],
    ) -> Result<GenerationAck, ClientError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.start
            .lock()
            .expect("start lock should work")
            .take()
            .unwrap_or_else(|| Err(ClientError::InvalidInput("started twice".to_string())))
    }

    fn poll_status(&self, _job_id: &str) -> Result<GenerationStatus, ClientError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .expect("status lock should work")
            .pop_front()
            .unwrap_or_else(|| Ok(running()))
    }
}

/// Sleeper that returns immediately and counts calls.
///
/// When `cancel_on` is set, the handle is cancelled on that sleep call.
#[derive(Debug, Default)]
pub struct InstantSleeper {
    pub sleeps: Arc<AtomicU32>,
    pub cancel_on: Option<(u32, CancelHandle)>,
}

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
        let call = self.sleeps.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((trigger, handle)) = &self.cancel_on
            && *trigger == call
        {
            handle.cancel();
        }
        ready(())
    }
}

#[allow(dead_code)]
pub fn running() -> GenerationStatus {
    GenerationStatus::new(GenerationState::Running, None, None)
}

#[allow(dead_code)]
pub fn done(path: Option<&str>) -> GenerationStatus {
    GenerationStatus::new(GenerationState::Done, path, None)
}

#[allow(dead_code)]
pub fn failed(message: Option<&str>) -> GenerationStatus {
    GenerationStatus::new(GenerationState::Error, None, message)
}

/// Job that finished uploading as `abc_1.png` with id `abc`.
pub fn uploaded_job() -> Job {
    let mut job = Job::new("abc_1.png").expect("job should build");
    job.begin_upload().expect("upload should begin");
    job.assign_upload("abc_1.png", "abc")
        .expect("upload should be assigned");
    job
}

/// Ten polls at one second each.
pub fn short_config() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_secs(1),
        budget: Duration::from_secs(10),
        ..PollerConfig::default()
    }
}
