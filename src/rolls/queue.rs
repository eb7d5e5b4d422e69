//! Roll request queue
//!
//! Outstanding dice-roll requests in arrival order. Only the oldest pending
//! request is exposed as "current", so a human roller sees one prompt at a
//! time however many are queued.
//!
//! Deduplication key: kind, actor (or "any"), description, dice, and the
//! advantage/disadvantage flags. Adding an equivalent request while one is
//! pending returns the pending request's id.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RollKind, RollResult};
use crate::dice::{parse_dice, DiceRoll, RollMode};
use crate::error::{EngineError, Result};

/// A roll request as supplied by the narrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollRequestSpec {
    #[serde(rename = "type")]
    pub kind: RollKind,
    #[serde(default, alias = "actor_id")]
    pub actor_id: Option<String>,
    #[serde(default, alias = "description")]
    pub purpose: String,
    pub formula: String,
    #[serde(default)]
    pub advantage: bool,
    #[serde(default)]
    pub disadvantage: bool,
    #[serde(default)]
    pub dc: Option<i32>,
    #[serde(default)]
    pub ac: Option<i32>,
}

impl RollRequestSpec {
    pub fn new(kind: RollKind, purpose: &str, formula: &str) -> Self {
        Self {
            kind,
            actor_id: None,
            purpose: purpose.to_string(),
            formula: formula.to_string(),
            advantage: false,
            disadvantage: false,
            dc: None,
            ac: None,
        }
    }

    pub fn for_actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn with_dc(mut self, dc: i32) -> Self {
        self.dc = Some(dc);
        self
    }

    pub fn with_ac(mut self, ac: i32) -> Self {
        self.ac = Some(ac);
        self
    }

    pub fn with_advantage(mut self) -> Self {
        self.advantage = true;
        self
    }

    pub fn with_disadvantage(mut self) -> Self {
        self.disadvantage = true;
        self
    }
}

/// Lifecycle of a queued request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Completed,
    Cancelled,
}

/// A queued roll request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollRequest {
    pub id: String,
    pub kind: RollKind,
    pub actor_id: Option<String>,
    pub description: String,
    pub dice: DiceRoll,
    pub advantage: bool,
    pub disadvantage: bool,
    pub dc: Option<i32>,
    pub ac: Option<i32>,
    pub batch_id: Option<String>,
    pub status: RequestStatus,
    pub result: Option<RollResult>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
struct DedupKey<'a> {
    kind: RollKind,
    actor: &'a str,
    description: &'a str,
    dice: DiceRoll,
    advantage: bool,
    disadvantage: bool,
}

impl RollRequest {
    fn dedup_key(&self) -> DedupKey<'_> {
        DedupKey {
            kind: self.kind,
            actor: self.actor_id.as_deref().unwrap_or("any"),
            description: &self.description,
            dice: self.dice,
            advantage: self.advantage,
            disadvantage: self.disadvantage,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    pub fn mode(&self) -> RollMode {
        RollMode::from_flags(self.advantage, self.disadvantage)
    }

    /// The request as it would be phrased to a roller
    pub fn spec(&self) -> RollRequestSpec {
        RollRequestSpec {
            kind: self.kind,
            actor_id: self.actor_id.clone(),
            purpose: self.description.clone(),
            formula: self.dice.to_string(),
            advantage: self.advantage,
            disadvantage: self.disadvantage,
            dc: self.dc,
            ac: self.ac,
        }
    }
}

/// Pending and recently finished roll requests
#[derive(Debug, Clone)]
pub struct RollRequestQueue {
    requests: Vec<RollRequest>,
    current: Option<String>,
    active_batch: Option<String>,
    batch_results: Vec<RollResult>,
    cleanup_delay: Duration,
    cleanup_at: Option<DateTime<Utc>>,
}

impl Default for RollRequestQueue {
    fn default() -> Self {
        Self::new(Duration::milliseconds(3000))
    }
}

impl RollRequestQueue {
    pub fn new(cleanup_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            current: None,
            active_batch: None,
            batch_results: Vec::new(),
            cleanup_delay,
            cleanup_at: None,
        }
    }

    fn build(spec: &RollRequestSpec, batch_id: Option<&str>) -> Result<RollRequest> {
        Ok(RollRequest {
            id: uuid::Uuid::new_v4().to_string(),
            kind: spec.kind,
            actor_id: spec.actor_id.clone(),
            description: spec.purpose.clone(),
            dice: parse_dice(&spec.formula)?,
            advantage: spec.advantage,
            disadvantage: spec.disadvantage,
            dc: spec.dc,
            ac: spec.ac,
            batch_id: batch_id.map(str::to_string),
            status: RequestStatus::Pending,
            result: None,
            created_at: Utc::now(),
        })
    }

    fn enqueue(&mut self, request: RollRequest) -> String {
        if let Some(existing) = self
            .requests
            .iter()
            .find(|r| r.is_pending() && r.dedup_key() == request.dedup_key())
        {
            debug!("Duplicate roll request for '{}'", request.description);
            return existing.id.clone();
        }

        let id = request.id.clone();
        debug!("Queued {} roll {}: {}", request.kind, id, request.description);
        self.requests.push(request);
        self.cleanup_at = None;
        if self.current.is_none() {
            self.current = Some(id.clone());
        }
        id
    }

    /// Queue one request; returns its id, or the id of an equivalent pending one
    pub fn add_request(&mut self, spec: &RollRequestSpec, batch_id: Option<&str>) -> Result<String> {
        let request = Self::build(spec, batch_id)?;
        Ok(self.enqueue(request))
    }

    /// Queue several requests from one submission.
    ///
    /// More than one request shares a fresh batch id, which becomes the
    /// active batch. Every formula is checked before anything is queued.
    pub fn add_batch(&mut self, specs: &[RollRequestSpec]) -> Result<Vec<String>> {
        let batch_id = (specs.len() > 1).then(|| uuid::Uuid::new_v4().to_string());
        let requests = specs
            .iter()
            .map(|spec| Self::build(spec, batch_id.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        let ids: Vec<String> = requests.into_iter().map(|r| self.enqueue(r)).collect();
        if let Some(batch_id) = batch_id {
            // A duplicate of an earlier pending request joins this batch
            for request in self.requests.iter_mut().filter(|r| ids.contains(&r.id)) {
                request.batch_id = Some(batch_id.clone());
            }
            self.active_batch = Some(batch_id);
            self.batch_results.clear();
        }
        Ok(ids)
    }

    pub fn get(&self, id: &str) -> Option<&RollRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    /// The one request shown to the roller
    pub fn current(&self) -> Option<&RollRequest> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    pub fn pending(&self) -> impl Iterator<Item = &RollRequest> {
        self.requests.iter().filter(|r| r.is_pending())
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn finish(&mut self, id: &str, status: RequestStatus, result: Option<RollResult>, now: DateTime<Utc>) -> Result<&RollRequest> {
        let active_batch = self.active_batch.clone();
        let index = self
            .requests
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| EngineError::RollNotFound(id.to_string()))?;

        let request = &mut self.requests[index];
        if !request.is_pending() {
            return Err(EngineError::RollNotPending(id.to_string()));
        }
        request.status = status;
        request.result = result.clone();
        if let (Some(result), Some(batch)) = (result, &request.batch_id) {
            if active_batch.as_ref() == Some(batch) {
                self.batch_results.push(result);
            }
        }
        debug!("Roll {} {:?}", id, status);

        let next = self.pending().next().map(|r| r.id.clone());
        self.current = next;
        if self.current.is_none() {
            self.cleanup_at = Some(now + self.cleanup_delay);
        }
        Ok(&self.requests[index])
    }

    /// Record the result of a pending request
    pub fn complete_request(&mut self, id: &str, result: RollResult, now: DateTime<Utc>) -> Result<&RollRequest> {
        self.finish(id, RequestStatus::Completed, Some(result), now)
    }

    /// Withdraw a pending request without a result
    pub fn cancel_request(&mut self, id: &str, now: DateTime<Utc>) -> Result<&RollRequest> {
        self.finish(id, RequestStatus::Cancelled, None, now)
    }

    pub fn active_batch(&self) -> Option<&str> {
        self.active_batch.as_deref()
    }

    /// True once nothing in the active batch is pending and at least one result came back
    pub fn is_batch_complete(&self) -> bool {
        let Some(batch) = &self.active_batch else {
            return false;
        };
        let outstanding = self
            .pending()
            .any(|r| r.batch_id.as_ref() == Some(batch));
        !outstanding && !self.batch_results.is_empty()
    }

    pub fn batch_results(&self) -> &[RollResult] {
        &self.batch_results
    }

    /// Forget the active batch; queued requests are untouched
    pub fn clear_batch(&mut self) {
        self.active_batch = None;
        self.batch_results.clear();
    }

    /// When the deferred clear will fire, if one is scheduled
    pub fn cleanup_deadline(&self) -> Option<DateTime<Utc>> {
        self.cleanup_at
    }

    /// Fire the deferred clear if it is due. Returns true if the queue was cleared.
    pub fn poll_cleanup(&mut self, now: DateTime<Utc>) -> bool {
        match self.cleanup_at {
            Some(at) if at <= now && self.current.is_none() => {
                debug!("Clearing {} finished roll requests", self.requests.len());
                self.requests.clear();
                self.cleanup_at = None;
                true
            }
            _ => false,
        }
    }
}
