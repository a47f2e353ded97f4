//! The worker's local job graph. Vertices are keyed by job id with edge
//! sets of ids; a synthetic control vertex (`DUMB_JOB_ID`) gates every
//! remote receive until its payload has arrived. Commands and payloads
//! race freely: whichever arrives first leaves a pending placeholder for
//! the other to complete.

use std::collections::{HashMap, VecDeque};

use log::{debug, warn};
use nimbus_common::id::{IdSet, JobId, DUMB_JOB_ID};
use nimbus_proto::DataFrame;

use crate::error::{WorkerError, WorkerResult};
use crate::job::{ReceivedPayload, WorkerJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexState {
    /// The synthetic payload gate; never executed.
    Control,
    /// Referenced before its command arrived; no job attached yet.
    Pending,
    /// Payload arrived before the receive command.
    PendingDataReceived,
    /// One or more mega payloads arrived before the mega command.
    PendingMegaDataReceived,
    /// Command received, waiting on incoming edges.
    Blocked,
    /// No incoming edges left; handed to the execution pool.
    Ready,
    /// Executing on the pool.
    Running,
    /// Finished locally; the vertex is removed and remembered as a hint.
    Finish,
}

#[derive(Debug)]
struct Vertex {
    state: VertexState,
    job: Option<WorkerJob>,
    incoming: IdSet<JobId>,
    outgoing: IdSet<JobId>,
    /// Payload held for a plain receive whose command has not arrived.
    early_payload: Option<ReceivedPayload>,
    /// Payloads held for a mega receive whose command has not arrived,
    /// keyed by constituent receive id.
    early_mega_payloads: HashMap<JobId, ReceivedPayload>,
}

impl Vertex {
    fn new(state: VertexState) -> Self {
        Self {
            state,
            job: None,
            incoming: IdSet::new(),
            outgoing: IdSet::new(),
            early_payload: None,
            early_mega_payloads: HashMap::new(),
        }
    }
}

/// A job whose dependencies have cleared, ready for the execution pool.
#[derive(Debug)]
pub struct ReadyJob {
    pub job_id: JobId,
    pub job: WorkerJob,
}

/// Recently finished job ids, bounded so predecessor lookups against
/// long-gone jobs stay memory-safe. Overflow evicts the oldest.
#[derive(Debug)]
struct FinishHints {
    capacity: usize,
    set: IdSet<JobId>,
    queue: VecDeque<JobId>,
}

impl FinishHints {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            set: IdSet::new(),
            queue: VecDeque::new(),
        }
    }

    fn add(&mut self, job_id: JobId) {
        if !self.set.insert(job_id) {
            return;
        }
        self.queue.push_back(job_id);
        if self.queue.len() > self.capacity {
            if let Some(oldest) = self.queue.pop_front() {
                self.set.remove(&oldest);
            }
        }
    }

    fn contains(&self, job_id: JobId) -> bool {
        self.set.contains(&job_id)
    }
}

#[derive(Debug)]
pub struct WorkerJobGraph {
    vertices: HashMap<JobId, Vertex>,
    hints: FinishHints,
}

impl WorkerJobGraph {
    pub fn new(hint_capacity: usize) -> Self {
        let mut vertices = HashMap::new();
        vertices.insert(DUMB_JOB_ID, Vertex::new(VertexState::Control));
        Self {
            vertices,
            hints: FinishHints::new(hint_capacity),
        }
    }

    pub fn state(&self, job_id: JobId) -> Option<VertexState> {
        self.vertices.get(&job_id).map(|v| v.state)
    }

    pub fn blocked_count(&self) -> usize {
        self.vertices
            .values()
            .filter(|v| v.state == VertexState::Blocked)
            .count()
    }

    /// Adds the job a command described, wiring edges from every
    /// unfinished predecessor, or completes a placeholder the data plane
    /// created first. Returns the jobs this made ready.
    pub fn add_job(
        &mut self,
        job_id: JobId,
        before_set: &IdSet<JobId>,
        mut job: WorkerJob,
    ) -> WorkerResult<Vec<ReadyJob>> {
        if job_id == DUMB_JOB_ID {
            return Err(WorkerError::Internal(
                "job id collides with the control vertex".into(),
            ));
        }
        let needs_gate = match self.vertices.get_mut(&job_id) {
            None => {
                self.vertices
                    .insert(job_id, Vertex::new(VertexState::Blocked));
                job.is_receive()
            }
            Some(vertex) => match vertex.state {
                VertexState::Pending => {
                    vertex.state = VertexState::Blocked;
                    job.is_receive()
                }
                VertexState::PendingDataReceived => {
                    let WorkerJob::RemoteCopyReceive(receive) = &mut job else {
                        return Err(WorkerError::UnknownReceive(job_id));
                    };
                    receive.payload = vertex.early_payload.take();
                    vertex.state = VertexState::Blocked;
                    false
                }
                VertexState::PendingMegaDataReceived => {
                    let WorkerJob::MegaReceive(mega) = &mut job else {
                        return Err(WorkerError::UnknownReceive(job_id));
                    };
                    mega.payloads = std::mem::take(&mut vertex.early_mega_payloads);
                    vertex.state = VertexState::Blocked;
                    !mega.all_data_received()
                }
                _ => return Err(WorkerError::DuplicateJob(job_id)),
            },
        };
        if needs_gate {
            self.add_edge(DUMB_JOB_ID, job_id);
        }
        self.vertices
            .get_mut(&job_id)
            .expect("vertex just ensured")
            .job = Some(job);

        for &before_id in before_set {
            if self.hints.contains(before_id) {
                continue;
            }
            if !self.vertices.contains_key(&before_id) {
                if before_id.is_scheduler_produced() {
                    // Copy jobs finish locally; an unknown one is done.
                    continue;
                }
                self.vertices
                    .insert(before_id, Vertex::new(VertexState::Pending));
            }
            if self.vertices[&before_id].state != VertexState::Finish {
                self.add_edge(before_id, job_id);
            }
        }

        let mut ready = Vec::new();
        self.promote_if_ready(job_id, &mut ready);
        Ok(ready)
    }

    /// A payload landed on the data plane. Matches it against its receive
    /// vertex, or stores it in a placeholder when the command lost the
    /// race.
    pub fn data_received(&mut self, frame: DataFrame) -> WorkerResult<Vec<ReadyJob>> {
        let payload = ReceivedPayload {
            version: frame.version,
            bytes: frame.payload,
        };
        match frame.mega_receive_job_id {
            None => self.plain_data_received(frame.receive_job_id, payload),
            Some(mega_id) => self.mega_data_received(mega_id, frame.receive_job_id, payload),
        }
    }

    fn plain_data_received(
        &mut self,
        receive_id: JobId,
        payload: ReceivedPayload,
    ) -> WorkerResult<Vec<ReadyJob>> {
        let mut ready = Vec::new();
        let attached = match self.vertices.get_mut(&receive_id) {
            None => {
                let mut vertex = Vertex::new(VertexState::PendingDataReceived);
                vertex.early_payload = Some(payload);
                self.vertices.insert(receive_id, vertex);
                false
            }
            Some(vertex) => match vertex.state {
                VertexState::Pending => {
                    vertex.early_payload = Some(payload);
                    vertex.state = VertexState::PendingDataReceived;
                    false
                }
                VertexState::Blocked => {
                    let Some(WorkerJob::RemoteCopyReceive(receive)) = vertex.job.as_mut() else {
                        return Err(WorkerError::UnknownReceive(receive_id));
                    };
                    receive.payload = Some(payload);
                    true
                }
                _ => return Err(WorkerError::UnknownReceive(receive_id)),
            },
        };
        if attached {
            self.remove_edge(DUMB_JOB_ID, receive_id);
            self.promote_if_ready(receive_id, &mut ready);
        }
        Ok(ready)
    }

    fn mega_data_received(
        &mut self,
        mega_id: JobId,
        receive_id: JobId,
        payload: ReceivedPayload,
    ) -> WorkerResult<Vec<ReadyJob>> {
        let mut ready = Vec::new();
        let complete = match self.vertices.get_mut(&mega_id) {
            None => {
                let mut vertex = Vertex::new(VertexState::PendingMegaDataReceived);
                vertex.early_mega_payloads.insert(receive_id, payload);
                self.vertices.insert(mega_id, vertex);
                false
            }
            Some(vertex) => match vertex.state {
                VertexState::Pending | VertexState::PendingMegaDataReceived => {
                    vertex.early_mega_payloads.insert(receive_id, payload);
                    vertex.state = VertexState::PendingMegaDataReceived;
                    false
                }
                VertexState::Blocked => {
                    let Some(WorkerJob::MegaReceive(mega)) = vertex.job.as_mut() else {
                        return Err(WorkerError::UnknownReceive(mega_id));
                    };
                    mega.payloads.insert(receive_id, payload);
                    mega.all_data_received()
                }
                _ => return Err(WorkerError::UnknownReceive(mega_id)),
            },
        };
        if complete {
            self.remove_edge(DUMB_JOB_ID, mega_id);
            self.promote_if_ready(mega_id, &mut ready);
        }
        Ok(ready)
    }

    pub fn mark_running(&mut self, job_id: JobId) {
        if let Some(vertex) = self.vertices.get_mut(&job_id) {
            vertex.state = VertexState::Running;
        }
    }

    /// A locally executed job finished: release its successors and forget
    /// the vertex, remembering application ids in the hint set.
    pub fn job_finished(&mut self, job_id: JobId) -> Vec<ReadyJob> {
        let mut ready = Vec::new();
        let Some(vertex) = self.vertices.remove(&job_id) else {
            warn!("finished job {job_id} is not in the local graph");
            return ready;
        };
        for succ in vertex.outgoing {
            if let Some(next) = self.vertices.get_mut(&succ) {
                next.incoming.remove(&job_id);
            }
            self.promote_if_ready(succ, &mut ready);
        }
        if !job_id.is_scheduler_produced() {
            self.hints.add(job_id);
        }
        ready
    }

    /// The controller reported a remote job done. Local copy jobs resolve
    /// without the controller, so their ids are ignored here.
    pub fn controller_job_done(&mut self, job_id: JobId) -> Vec<ReadyJob> {
        let mut ready = Vec::new();
        if job_id.is_scheduler_produced() {
            return ready;
        }
        match self.vertices.get(&job_id) {
            Some(vertex) if vertex.state == VertexState::Pending => {
                let vertex = self.vertices.remove(&job_id).expect("vertex present");
                for succ in vertex.outgoing {
                    if let Some(next) = self.vertices.get_mut(&succ) {
                        next.incoming.remove(&job_id);
                    }
                    self.promote_if_ready(succ, &mut ready);
                }
                self.hints.add(job_id);
            }
            Some(vertex) => {
                debug!(
                    "job-done for job {job_id} in state {:?} is resolved locally",
                    vertex.state
                );
            }
            None => self.hints.add(job_id),
        }
        ready
    }

    /// Prepare-rewind: drop everything that has not started running.
    /// Running jobs drain through [`WorkerJobGraph::job_finished`].
    pub fn clear_blocked(&mut self) {
        self.vertices.retain(|_, vertex| {
            matches!(
                vertex.state,
                VertexState::Control | VertexState::Running | VertexState::Ready
            )
        });
        // Dangling edges into removed vertices are harmless; promotion
        // skips missing successors.
    }

    /// True once only the control vertex remains.
    pub fn quiesced(&self) -> bool {
        self.vertices
            .values()
            .all(|vertex| vertex.state == VertexState::Control)
    }

    fn promote_if_ready(&mut self, job_id: JobId, ready: &mut Vec<ReadyJob>) {
        let Some(vertex) = self.vertices.get_mut(&job_id) else {
            return;
        };
        if vertex.state == VertexState::Blocked && vertex.incoming.is_empty() {
            if let Some(job) = vertex.job.take() {
                vertex.state = VertexState::Ready;
                ready.push(ReadyJob { job_id, job });
            }
        }
    }

    fn add_edge(&mut self, from: JobId, to: JobId) {
        if let Some(vertex) = self.vertices.get_mut(&from) {
            vertex.outgoing.insert(to);
        }
        if let Some(vertex) = self.vertices.get_mut(&to) {
            vertex.incoming.insert(from);
        }
    }

    fn remove_edge(&mut self, from: JobId, to: JobId) {
        if let Some(vertex) = self.vertices.get_mut(&from) {
            vertex.outgoing.remove(&to);
        }
        if let Some(vertex) = self.vertices.get_mut(&to) {
            vertex.incoming.remove(&from);
        }
    }
}

#[cfg(test)]
mod tests;
