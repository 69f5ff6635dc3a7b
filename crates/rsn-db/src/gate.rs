//! Credential gate.
//!
//! An organization is *locked* when no employee holds both a PRACTITIONER
//! account there and a live, unexpired ACTIVE license. Computed on demand —
//! never cached or denormalized — so it always reflects the latest license
//! sweep. Freshness is bounded by the sweep interval, which is an accepted
//! eventual-consistency window.

use sqlx::PgConnection;
use uuid::Uuid;

use rsn_domain::DomainResult;

use crate::map_db_err;

/// `true` when the organization must be blocked from advancing orders.
pub async fn org_is_locked(conn: &mut PgConnection, organization_id: Uuid) -> DomainResult<bool> {
    let (has_credentialed_practitioner,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from accounts a
            join employees e on e.employee_id = a.employee_id
            join licenses l on l.employee_id = a.employee_id
            where a.organization_id = $1
              and a.role = 'PRACTITIONER'
              and e.deleted_at is null
              and l.deleted_at is null
              and l.status = 'ACTIVE'
              and l.expiration_date > now()
        )
        "#,
    )
    .bind(organization_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_db_err)?;

    Ok(!has_credentialed_practitioner)
}
