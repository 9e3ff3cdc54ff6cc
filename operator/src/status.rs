use chrono::{SecondsFormat, Utc};
use tracing::debug;

use crate::client::ClusterClient;
use crate::crd::{
    Condition, MemberPhase, MemberStatus, OperandPhase, OperandRequest, OperandRequestStatus,
    OperatorPhase, RequestPhase,
};
use crate::error::Error;

pub const READY_CONDITION: &str = "Ready";

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn initial_status() -> OperandRequestStatus {
    OperandRequestStatus {
        phase: Some(RequestPhase::Initializing),
        ..Default::default()
    }
}

/// Collects per-member outcomes during one pass and folds them into a status.
#[derive(Debug)]
pub struct StatusTracker {
    members: Vec<MemberStatus>,
    previous: Option<OperandRequestStatus>,
}

impl StatusTracker {
    /// Starts from the operands named in the spec, in spec order.
    pub fn new(req: &OperandRequest) -> Self {
        let mut members: Vec<MemberStatus> = Vec::new();
        for operand in req.spec.requests.iter().flat_map(|r| r.operands.iter()) {
            if !members.iter().any(|m| m.name == operand.name) {
                members.push(MemberStatus {
                    name: operand.name.clone(),
                    ..Default::default()
                });
            }
        }
        Self {
            members,
            previous: req.status.clone(),
        }
    }

    fn member(&mut self, name: &str) -> &mut MemberStatus {
        if let Some(i) = self.members.iter().position(|m| m.name == name) {
            return &mut self.members[i];
        }
        self.members.push(MemberStatus {
            name: name.to_string(),
            ..Default::default()
        });
        let last = self.members.len() - 1;
        &mut self.members[last]
    }

    pub fn operator(&mut self, name: &str, phase: OperatorPhase) {
        self.member(name).phase.operator_phase = Some(phase);
    }

    pub fn operator_failed(&mut self, name: &str, message: String) {
        let m = self.member(name);
        m.phase.operator_phase = Some(OperatorPhase::Failed);
        m.message = Some(message);
    }

    pub fn operand(&mut self, name: &str, phase: OperandPhase) {
        self.member(name).phase.operand_phase = Some(phase);
    }

    pub fn operand_failed(&mut self, name: &str, message: String) {
        let m = self.member(name);
        m.phase.operand_phase = Some(OperandPhase::Failed);
        m.message = Some(message);
    }

    pub fn members(&self) -> &[MemberStatus] {
        &self.members
    }

    pub fn build(self) -> OperandRequestStatus {
        let phase = compute_phase(&self.members);
        let previous = self
            .previous
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.r#type == READY_CONDITION));
        let ready = ready_condition(phase, &self.members, previous);
        OperandRequestStatus {
            phase: Some(phase),
            members: self.members,
            conditions: vec![ready],
        }
    }
}

fn failed(phase: &MemberPhase) -> bool {
    phase.operator_phase == Some(OperatorPhase::Failed)
        || phase.operand_phase == Some(OperandPhase::Failed)
}

pub fn compute_phase(members: &[MemberStatus]) -> RequestPhase {
    if members.iter().any(|m| failed(&m.phase)) {
        RequestPhase::Failed
    } else if members
        .iter()
        .any(|m| m.phase.operator_phase != Some(OperatorPhase::Running))
    {
        RequestPhase::Installing
    } else if members
        .iter()
        .any(|m| m.phase.operand_phase == Some(OperandPhase::Creating))
    {
        RequestPhase::Creating
    } else {
        RequestPhase::Running
    }
}

/// The transition time moves only when the condition's status flips.
pub fn ready_condition(
    phase: RequestPhase,
    members: &[MemberStatus],
    previous: Option<&Condition>,
) -> Condition {
    let running = members
        .iter()
        .filter(|m| m.phase.operator_phase == Some(OperatorPhase::Running) && !failed(&m.phase))
        .count();
    let status = if phase == RequestPhase::Running {
        "True"
    } else {
        "False"
    };
    let last_transition_time = match previous {
        Some(c) if c.status == status => c.last_transition_time.clone(),
        _ => Some(now()),
    };
    Condition {
        r#type: READY_CONDITION.into(),
        status: status.into(),
        reason: Some(phase.to_string()),
        message: Some(format!("{running}/{} operators running", members.len())),
        last_transition_time,
    }
}

/// Writes `status` unless it already matches; `req` is refreshed on write.
pub async fn persist(
    client: &dyn ClusterClient,
    req: &mut OperandRequest,
    status: OperandRequestStatus,
) -> Result<bool, Error> {
    if req.status.as_ref() == Some(&status) {
        return Ok(false);
    }
    debug!(phase = ?status.phase, "updating OperandRequest status");
    req.status = Some(status);
    *req = client.update_request_status(req).await?;
    Ok(true)
}

/// Moves the request to `Deleting`, keeping member entries for visibility.
pub async fn mark_deleting(client: &dyn ClusterClient, req: &mut OperandRequest) -> Result<bool, Error> {
    let mut status = req.status.clone().unwrap_or_default();
    if status.phase == Some(RequestPhase::Deleting) {
        return Ok(false);
    }
    status.phase = Some(RequestPhase::Deleting);
    persist(client, req, status).await
}
