//! Service-request phase machine.
//!
//! The composite phase is *derived* from persisted order/specimen state, not
//! stored: two writers can never disagree with the store about what phase a
//! service request is in. [`allowed`] is the single legality table for every
//! workflow transition; illegal combinations return [`TransitionError`],
//! which the workflow surfaces as a conflict with no state change.
//!
//! ```text
//!   Draft ─► KitAssigned ─► PatientAssigned ─► PractitionerAssigned
//!                                                │            │
//!                                   (optional)   ▼            │
//!                                    RequisitionUploaded ─────┤
//!                                                             ▼
//!            ResultReceived ◄── SubmittedToLab ◄── Finalized
//!
//!   any phase before SubmittedToLab ─► Canceled (terminal)
//! ```

use crate::types::{OrderStatus, ReqFormStatus, SpecimenStatus};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Composite order/service-request/specimen phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Draft,
    KitAssigned,
    PatientAssigned,
    PractitionerAssigned,
    RequisitionUploaded,
    /// Order ASSIGNED, requisition PENDING_APPROVAL, specimens ASSIGNED.
    Finalized,
    SubmittedToLab,
    /// Specimen COMPLETED. **Terminal.**
    ResultReceived,
    /// **Terminal.**
    Canceled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ResultReceived | Self::Canceled)
    }
}

/// The persisted facts a phase is derived from.
#[derive(Debug, Clone, Copy)]
pub struct SrSnapshot {
    pub order_status: OrderStatus,
    pub req_form_status: ReqFormStatus,
    pub submitted_to_lab: bool,
    pub specimen_status: Option<SpecimenStatus>,
    pub has_patient: bool,
    pub has_practitioner: bool,
}

/// Derive the composite phase from a snapshot.
///
/// Checks run from the most advanced phase backwards so a fully populated
/// snapshot lands on the furthest phase it has reached.
pub fn phase_of(s: &SrSnapshot) -> Phase {
    if s.order_status == OrderStatus::Canceled {
        return Phase::Canceled;
    }
    if s.specimen_status == Some(SpecimenStatus::Completed) {
        return Phase::ResultReceived;
    }
    if s.submitted_to_lab {
        return Phase::SubmittedToLab;
    }
    if s.order_status == OrderStatus::Assigned {
        return Phase::Finalized;
    }
    if s.req_form_status != ReqFormStatus::NotUploaded {
        return Phase::RequisitionUploaded;
    }
    if s.has_practitioner {
        return Phase::PractitionerAssigned;
    }
    if s.has_patient {
        return Phase::PatientAssigned;
    }
    if s.specimen_status.is_some() {
        return Phase::KitAssigned;
    }
    Phase::Draft
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Every transition the workflow can attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    AssignKit,
    AssignPatient,
    AssignPractitioner,
    UploadRequisition,
    Finalize,
    Cancel,
    SubmitToLab,
    RecordResult,
}

/// Returned when a transition is attempted from a phase where it is not
/// legal. The workflow maps this onto the conflict branch of the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: Phase,
    pub transition: Transition,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal transition: {:?} from phase {:?}",
            self.transition, self.from
        )
    }
}

impl std::error::Error for TransitionError {}

/// The legality table.
///
/// Assignment transitions stay legal through `RequisitionUploaded` so a kit,
/// patient, or practitioner can be corrected any time before finalization.
/// Requisition upload is optional: `Finalize` accepts both
/// `PractitionerAssigned` and `RequisitionUploaded`.
pub fn allowed(from: Phase, transition: Transition) -> Result<(), TransitionError> {
    use Phase::*;
    use Transition::*;

    let ok = match (from, transition) {
        (
            Draft | KitAssigned | PatientAssigned | PractitionerAssigned | RequisitionUploaded,
            AssignKit,
        ) => true,

        (
            KitAssigned | PatientAssigned | PractitionerAssigned | RequisitionUploaded,
            AssignPatient,
        ) => true,

        (PatientAssigned | PractitionerAssigned | RequisitionUploaded, AssignPractitioner) => true,

        (PractitionerAssigned | RequisitionUploaded, UploadRequisition) => true,

        (PractitionerAssigned | RequisitionUploaded, Finalize) => true,

        // Cancel is legal anywhere before lab submission.
        (
            Draft | KitAssigned | PatientAssigned | PractitionerAssigned | RequisitionUploaded
            | Finalized,
            Cancel,
        ) => true,

        (Finalized, SubmitToLab) => true,

        (SubmittedToLab, RecordResult) => true,

        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(TransitionError { from, transition })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> SrSnapshot {
        SrSnapshot {
            order_status: OrderStatus::Draft,
            req_form_status: ReqFormStatus::NotUploaded,
            submitted_to_lab: false,
            specimen_status: None,
            has_patient: false,
            has_practitioner: false,
        }
    }

    #[test]
    fn fresh_request_is_draft() {
        assert_eq!(phase_of(&draft()), Phase::Draft);
    }

    #[test]
    fn phase_advances_with_each_assignment() {
        let mut s = draft();
        s.specimen_status = Some(SpecimenStatus::Draft);
        assert_eq!(phase_of(&s), Phase::KitAssigned);
        s.has_patient = true;
        assert_eq!(phase_of(&s), Phase::PatientAssigned);
        s.has_practitioner = true;
        assert_eq!(phase_of(&s), Phase::PractitionerAssigned);
        s.req_form_status = ReqFormStatus::Uploaded;
        assert_eq!(phase_of(&s), Phase::RequisitionUploaded);
    }

    #[test]
    fn finalized_outranks_requisition_state() {
        let s = SrSnapshot {
            order_status: OrderStatus::Assigned,
            req_form_status: ReqFormStatus::PendingApproval,
            submitted_to_lab: false,
            specimen_status: Some(SpecimenStatus::Assigned),
            has_patient: true,
            has_practitioner: true,
        };
        assert_eq!(phase_of(&s), Phase::Finalized);
    }

    #[test]
    fn submission_and_result_are_most_advanced() {
        let mut s = SrSnapshot {
            order_status: OrderStatus::Assigned,
            req_form_status: ReqFormStatus::PendingApproval,
            submitted_to_lab: true,
            specimen_status: Some(SpecimenStatus::Assigned),
            has_patient: true,
            has_practitioner: true,
        };
        assert_eq!(phase_of(&s), Phase::SubmittedToLab);
        s.specimen_status = Some(SpecimenStatus::Completed);
        assert_eq!(phase_of(&s), Phase::ResultReceived);
    }

    #[test]
    fn canceled_wins_over_everything() {
        let mut s = draft();
        s.order_status = OrderStatus::Canceled;
        s.submitted_to_lab = true;
        assert_eq!(phase_of(&s), Phase::Canceled);
    }

    #[test]
    fn finalize_requires_practitioner() {
        assert!(allowed(Phase::PatientAssigned, Transition::Finalize).is_err());
        assert!(allowed(Phase::PractitionerAssigned, Transition::Finalize).is_ok());
    }

    #[test]
    fn requisition_is_optional_before_finalize() {
        assert!(allowed(Phase::PractitionerAssigned, Transition::Finalize).is_ok());
        assert!(allowed(Phase::RequisitionUploaded, Transition::Finalize).is_ok());
    }

    #[test]
    fn kit_can_be_reassigned_until_finalized() {
        assert!(allowed(Phase::RequisitionUploaded, Transition::AssignKit).is_ok());
        assert!(allowed(Phase::Finalized, Transition::AssignKit).is_err());
    }

    #[test]
    fn cancel_is_blocked_after_submission() {
        assert!(allowed(Phase::Finalized, Transition::Cancel).is_ok());
        let err = allowed(Phase::SubmittedToLab, Transition::Cancel).unwrap_err();
        assert_eq!(err.from, Phase::SubmittedToLab);
        assert_eq!(err.transition, Transition::Cancel);
        assert!(allowed(Phase::ResultReceived, Transition::Cancel).is_err());
    }

    #[test]
    fn submit_only_from_finalized() {
        assert!(allowed(Phase::Finalized, Transition::SubmitToLab).is_ok());
        assert!(allowed(Phase::PractitionerAssigned, Transition::SubmitToLab).is_err());
        assert!(allowed(Phase::SubmittedToLab, Transition::SubmitToLab).is_err());
    }

    #[test]
    fn result_only_after_submission() {
        assert!(allowed(Phase::SubmittedToLab, Transition::RecordResult).is_ok());
        assert!(allowed(Phase::Finalized, Transition::RecordResult).is_err());
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Canceled.is_terminal());
        assert!(Phase::ResultReceived.is_terminal());
        assert!(!Phase::Finalized.is_terminal());
    }
}
