use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

// ---------------------------------------------------------------------------
// Status enums
//
// Stored as text; `as_str`/`parse` are the single source of the wire strings
// and must stay in lockstep with the CHECK constraints in the migrations.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    Ordered,
    Assigned,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Ordered => "ORDERED",
            Self::Assigned => "ASSIGNED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "ORDERED" => Ok(Self::Ordered),
            "ASSIGNED" => Ok(Self::Assigned),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(DomainError::validation(
                "status",
                format!("invalid order status: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReqFormStatus {
    NotUploaded,
    Uploaded,
    PendingApproval,
    Approved,
}

impl ReqFormStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotUploaded => "NOT_UPLOADED",
            Self::Uploaded => "UPLOADED",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "NOT_UPLOADED" => Ok(Self::NotUploaded),
            "UPLOADED" => Ok(Self::Uploaded),
            "PENDING_APPROVAL" => Ok(Self::PendingApproval),
            "APPROVED" => Ok(Self::Approved),
            other => Err(DomainError::validation(
                "req_form_status",
                format!("invalid requisition form status: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpecimenStatus {
    Draft,
    Assigned,
    Completed,
    Canceled,
}

impl SpecimenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Assigned => "ASSIGNED",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "ASSIGNED" => Ok(Self::Assigned),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(DomainError::validation(
                "status",
                format!("invalid specimen status: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseStatus {
    PendingApproval,
    Active,
    Rejected,
    Expired,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Active => "ACTIVE",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "PENDING_APPROVAL" => Ok(Self::PendingApproval),
            "ACTIVE" => Ok(Self::Active),
            "REJECTED" => Ok(Self::Rejected),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(DomainError::validation(
                "status",
                format!("invalid license status: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountRole {
    Staff,
    Practitioner,
    Admin,
    BillingManager,
    Researcher,
    DataAnalyst,
    ProjectManager,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "STAFF",
            Self::Practitioner => "PRACTITIONER",
            Self::Admin => "ADMIN",
            Self::BillingManager => "BILLING_MANAGER",
            Self::Researcher => "RESEARCHER",
            Self::DataAnalyst => "DATA_ANALYST",
            Self::ProjectManager => "PROJECT_MANAGER",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "STAFF" => Ok(Self::Staff),
            "PRACTITIONER" => Ok(Self::Practitioner),
            "ADMIN" => Ok(Self::Admin),
            "BILLING_MANAGER" => Ok(Self::BillingManager),
            "RESEARCHER" => Ok(Self::Researcher),
            "DATA_ANALYST" => Ok(Self::DataAnalyst),
            "PROJECT_MANAGER" => Ok(Self::ProjectManager),
            other => Err(DomainError::validation(
                "role",
                format!("invalid account role: {other}"),
            )),
        }
    }

    /// Roles allowed to drive order transitions. Analyst-type roles are
    /// read-only on the fulfillment workflow.
    pub fn may_manage_orders(&self) -> bool {
        matches!(
            self,
            Self::Staff | Self::Practitioner | Self::Admin | Self::ProjectManager
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressKind {
    Shipping,
    Billing,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shipping => "SHIPPING",
            Self::Billing => "BILLING",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "SHIPPING" => Ok(Self::Shipping),
            "BILLING" => Ok(Self::Billing),
            other => Err(DomainError::validation(
                "kind",
                format!("invalid address kind: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentKind {
    Discount,
    Surcharge,
}

impl AdjustmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discount => "DISCOUNT",
            Self::Surcharge => "SURCHARGE",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "DISCOUNT" => Ok(Self::Discount),
            "SURCHARGE" => Ok(Self::Surcharge),
            other => Err(DomainError::validation(
                "kind",
                format!("invalid adjustment kind: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOp {
    Create,
    Update,
    Delete,
}

impl AuditOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(DomainError::validation(
                "op",
                format!("invalid audit op: {other}"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
//
// Field layout mirrors the migrations one-to-one. These structs are what the
// audit layer serializes as pre/post images, so renaming a field is a wire
// change.
// ---------------------------------------------------------------------------

/// Tenancy root. Every entity except employees and the audit trail is scoped
/// to exactly one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub organization_id: Uuid,
    pub name: String,
    pub billing_emails: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationAddress {
    pub address_id: Uuid,
    pub organization_id: Uuid,
    pub kind: AddressKind,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A person. Organization membership lives on `Account`; employees
/// themselves are global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub employee_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Membership of an employee in an organization. One per (employee, org).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub employee_id: Uuid,
    pub organization_id: Uuid,
    pub role: AccountRole,
    pub account_owner: bool,
    pub created_at: DateTime<Utc>,
}

/// Practitioner license. Append-only history: superseding soft-deletes the
/// old row and inserts a new one, never mutates in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub license_id: Uuid,
    pub employee_id: Uuid,
    pub number: String,
    pub state: String,
    pub effective_date: NaiveDate,
    pub expiration_date: DateTime<Utc>,
    pub status: LicenseStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: Uuid,
    pub organization_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Catalog entry; `price_cents` is the pricing engine's subtotal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceType {
    pub service_type_id: Uuid,
    pub name: String,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub organization_id: Uuid,
    /// Human-readable code, e.g. `RSN-20260806-1A2B3C`. Unique.
    pub order_code: String,
    pub status: OrderStatus,
    pub req_form_status: ReqFormStatus,
    /// Opaque blob-store key of the uploaded requisition form.
    pub req_form_key: Option<String>,
    pub submitted_to_lab: bool,
    /// Set exactly once, when the lab bridge accepts the order.
    pub lab_order_id: Option<String>,
    pub price_cents: Option<i64>,
    pub total_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Signed amount plus a kind tag. The sign is caller-supplied; the pricing
/// engine sums amounts as-is and never infers sign from the kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceAdjustment {
    pub adjustment_id: Uuid,
    pub order_id: Uuid,
    pub amount_cents: i64,
    pub kind: AdjustmentKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub service_request_id: Uuid,
    pub order_id: Uuid,
    pub service_type_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub practitioner_id: Option<Uuid>,
    pub questionnaire: Value,
    pub created_at: DateTime<Utc>,
}

/// Physical sample. `kit_id` is globally unique among non-deleted specimens;
/// the partial unique index in the store is the authoritative guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specimen {
    pub specimen_id: Uuid,
    pub service_request_id: Uuid,
    pub kit_id: String,
    pub status: SpecimenStatus,
    pub result_key: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One immutable audit row. Never updated or deleted; carries no foreign
/// keys so audit history survives any entity deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub actor_employee_id: Option<Uuid>,
    pub actor_label: Option<String>,
    pub op: AuditOp,
    pub entity: String,
    pub entity_id: Uuid,
    pub pre: Option<Value>,
    pub post: Option<Value>,
    pub duration_ms: i64,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Create inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewEmployee {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAddress {
    pub organization_id: Uuid,
    pub kind: AddressKind,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub is_default: bool,
}

#[derive(Debug, Clone)]
pub struct NewLicense {
    pub employee_id: Uuid,
    pub number: String,
    pub state: String,
    pub effective_date: NaiveDate,
    pub expiration_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPatient {
    pub organization_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct NewServiceRequest {
    pub order_id: Uuid,
    pub service_type_id: Uuid,
    pub questionnaire: Value,
}
