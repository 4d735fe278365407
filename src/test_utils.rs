//! Scripted backends and probes for exercising the client without a server
//!
//! These implement the crate's network traits from a queue of canned
//! responses and record every call for later verification.

use crate::backend::ImageOperations;
use crate::config::QualityPreset;
use crate::connection::HealthProbe;
use crate::error::{InpaintError, Result};
use crate::orchestrator::{
    EditRequest, JobBackend, JobEvent, JobId, JobObserver, JobStatus, StatusResponse,
};
use crate::types::{DeviceInfo, ImagePayload, OutpaintExtents};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum Step {
    Respond(StatusResponse),
    Fail(String),
}

/// Backend that answers status polls from a script
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    job_id: JobId,
    script: Arc<Mutex<VecDeque<Step>>>,
    repeat: Option<StatusResponse>,
    result: Vec<u8>,
    operation_result: Vec<u8>,
    fail_submit: bool,
    fail_operations: bool,
    call_history: Arc<Mutex<Vec<String>>>,
    submitted: Arc<Mutex<Vec<EditRequest>>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: JobId::from(job_id),
            script: Arc::new(Mutex::new(VecDeque::new())),
            repeat: None,
            result: b"result".to_vec(),
            operation_result: b"operation".to_vec(),
            fail_submit: false,
            fail_operations: false,
            call_history: Arc::new(Mutex::new(Vec::new())),
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn then_status(self, status: JobStatus) -> Self {
        self.then_response(StatusResponse::new(status))
    }

    #[must_use]
    pub fn then_response(self, response: StatusResponse) -> Self {
        self.script.lock().unwrap().push_back(Step::Respond(response));
        self
    }

    /// Queue `count` transient poll failures
    #[must_use]
    pub fn then_transient_failures(self, count: u32) -> Self {
        {
            let mut script = self.script.lock().unwrap();
            for i in 0..count {
                script.push_back(Step::Fail(format!("connection reset ({})", i + 1)));
            }
        }
        self
    }

    /// Answer with `status` once the script is exhausted
    #[must_use]
    pub fn repeat_status(mut self, status: JobStatus) -> Self {
        self.repeat = Some(StatusResponse::new(status));
        self
    }

    /// Bytes returned by `fetch_result`
    #[must_use]
    pub fn with_result(mut self, bytes: Vec<u8>) -> Self {
        self.result = bytes;
        self
    }

    /// Bytes returned by every image operation
    #[must_use]
    pub fn with_operation_result(mut self, bytes: Vec<u8>) -> Self {
        self.operation_result = bytes;
        self
    }

    #[must_use]
    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    #[must_use]
    pub fn failing_operations(mut self) -> Self {
        self.fail_operations = true;
        self
    }

    /// Get the call history for verification in tests
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    /// Requests received by `submit`
    pub fn submitted(&self) -> Vec<EditRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.count_calls("poll")
    }

    pub fn fetch_count(&self) -> usize {
        self.count_calls("fetch_result")
    }

    fn count_calls(&self, name: &str) -> usize {
        self.call_history
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == name)
            .count()
    }

    fn record(&self, name: &str) {
        self.call_history.lock().unwrap().push(name.to_string());
    }

    fn operation(&self, name: &str) -> Result<Vec<u8>> {
        self.record(name);
        if self.fail_operations {
            return Err(InpaintError::transient(format!("{} unavailable", name)));
        }
        Ok(self.operation_result.clone())
    }
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    async fn submit(&self, request: &EditRequest) -> Result<JobId> {
        self.record("submit");
        if self.fail_submit {
            return Err(InpaintError::transient("submit refused"));
        }
        self.submitted.lock().unwrap().push(request.clone());
        Ok(self.job_id.clone())
    }

    async fn poll(&self, _job_id: &JobId) -> Result<StatusResponse> {
        self.record("poll");
        let step = self.script.lock().unwrap().pop_front();
        match (step, &self.repeat) {
            (Some(Step::Respond(response)), _) => Ok(response),
            (Some(Step::Fail(message)), _) => Err(InpaintError::transient(message)),
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => Err(InpaintError::transient("script exhausted")),
        }
    }

    async fn fetch_result(&self, _job_id: &JobId) -> Result<Vec<u8>> {
        self.record("fetch_result");
        Ok(self.result.clone())
    }
}

#[async_trait]
impl ImageOperations for ScriptedBackend {
    async fn auto_mask(&self, _image: &ImagePayload, invert: bool) -> Result<Vec<u8>> {
        self.operation(if invert { "auto_mask_inverted" } else { "auto_mask" })
    }

    async fn refine_edges(&self, _image: &ImagePayload, _mask: &ImagePayload) -> Result<Vec<u8>> {
        self.operation("refine_edges")
    }

    async fn remove_background(&self, _image: &ImagePayload) -> Result<Vec<u8>> {
        self.operation("remove_background")
    }

    async fn replace_background(
        &self,
        _image: &ImagePayload,
        _background: &ImagePayload,
    ) -> Result<Vec<u8>> {
        self.operation("replace_background")
    }

    async fn outpaint(&self, _image: &ImagePayload, _extents: OutpaintExtents) -> Result<Vec<u8>> {
        self.operation("outpaint")
    }

    async fn batch_inpaint(
        &self,
        images: &[ImagePayload],
        _quality: QualityPreset,
    ) -> Result<Vec<u8>> {
        self.operation(&format!("batch_inpaint:{}", images.len()))
    }
}

/// Health probe with a fixed set of reachable endpoints
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    online: HashMap<String, String>,
    probed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `endpoint` reachable, reporting `device_name`
    #[must_use]
    pub fn online(mut self, endpoint: &str, device_name: &str) -> Self {
        self.online
            .insert(endpoint.to_string(), device_name.to_string());
        self
    }

    /// Endpoints probed so far, in order
    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, endpoint: &str) -> Result<DeviceInfo> {
        self.probed.lock().unwrap().push(endpoint.to_string());
        match self.online.get(endpoint) {
            Some(name) => Ok(DeviceInfo {
                device_name: name.clone(),
                device: None,
            }),
            None => Err(InpaintError::transient(format!("{} timed out", endpoint))),
        }
    }
}

/// Observer that keeps every event
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<JobEvent>>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl JobObserver for RecordingObserver {
    fn on_event(&self, event: &JobEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
