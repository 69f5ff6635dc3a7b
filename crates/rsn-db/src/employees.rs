//! Employee and account stores.

use std::time::Instant;

use chrono::Utc;
use sqlx::{Acquire, PgConnection, Row};
use uuid::Uuid;

use rsn_domain::{
    Account, AccountRole, Actor, AuditOp, DomainError, DomainResult, Employee, NewEmployee,
};

use crate::audit::{self, NewAuditRecord};
use crate::map_db_err;

pub async fn create_employee(
    conn: &mut PgConnection,
    actor: &Actor,
    input: NewEmployee,
) -> DomainResult<Employee> {
    if input.name.trim().is_empty() {
        return Err(DomainError::validation("name", "employee name is required"));
    }
    if input.email.trim().is_empty() {
        return Err(DomainError::validation("email", "employee email is required"));
    }

    let started = Instant::now();
    let employee = Employee {
        employee_id: Uuid::new_v4(),
        name: input.name,
        email: input.email,
        phone: input.phone,
        created_at: Utc::now(),
        deleted_at: None,
    };

    let mut tx = conn.begin().await.map_err(map_db_err)?;

    sqlx::query(
        r#"
        insert into employees (employee_id, name, email, phone, created_at)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(employee.employee_id)
    .bind(&employee.name)
    .bind(&employee.email)
    .bind(&employee.phone)
    .bind(employee.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "employee",
            entity_id: employee.employee_id,
            pre: None,
            post: Some(audit::image(&employee)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(employee)
}

/// Live employees only; soft-deleted rows are invisible here.
pub async fn fetch_employee(conn: &mut PgConnection, employee_id: Uuid) -> DomainResult<Employee> {
    let row = sqlx::query(
        r#"
        select employee_id, name, email, phone, created_at, deleted_at
        from employees
        where employee_id = $1 and deleted_at is null
        "#,
    )
    .bind(employee_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("employee", employee_id))?;

    Ok(Employee {
        employee_id: row.try_get("employee_id").map_err(map_db_err)?,
        name: row.try_get("name").map_err(map_db_err)?,
        email: row.try_get("email").map_err(map_db_err)?,
        phone: row.try_get("phone").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
        deleted_at: row.try_get("deleted_at").map_err(map_db_err)?,
    })
}

/// One account per (employee, organization); the unique constraint turns a
/// duplicate into a conflict.
pub async fn create_account(
    conn: &mut PgConnection,
    actor: &Actor,
    employee_id: Uuid,
    organization_id: Uuid,
    role: AccountRole,
    account_owner: bool,
) -> DomainResult<Account> {
    let started = Instant::now();
    let account = Account {
        account_id: Uuid::new_v4(),
        employee_id,
        organization_id,
        role,
        account_owner,
        created_at: Utc::now(),
    };

    let mut tx = conn.begin().await.map_err(map_db_err)?;

    sqlx::query(
        r#"
        insert into accounts (
          account_id, employee_id, organization_id, role, account_owner, created_at
        ) values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(account.account_id)
    .bind(account.employee_id)
    .bind(account.organization_id)
    .bind(account.role.as_str())
    .bind(account.account_owner)
    .bind(account.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "account",
            entity_id: account.account_id,
            pre: None,
            post: Some(audit::image(&account)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(account)
}

pub async fn fetch_account(
    conn: &mut PgConnection,
    employee_id: Uuid,
    organization_id: Uuid,
) -> DomainResult<Account> {
    let row = sqlx::query(
        r#"
        select account_id, employee_id, organization_id, role, account_owner, created_at
        from accounts
        where employee_id = $1 and organization_id = $2
        "#,
    )
    .bind(employee_id)
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("account", employee_id))?;

    Ok(Account {
        account_id: row.try_get("account_id").map_err(map_db_err)?,
        employee_id: row.try_get("employee_id").map_err(map_db_err)?,
        organization_id: row.try_get("organization_id").map_err(map_db_err)?,
        role: AccountRole::parse(&row.try_get::<String, _>("role").map_err(map_db_err)?)?,
        account_owner: row.try_get("account_owner").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
    })
}

/// Whether a live employee practices in the given organization.
pub async fn is_practitioner_in_org(
    conn: &mut PgConnection,
    employee_id: Uuid,
    organization_id: Uuid,
) -> DomainResult<bool> {
    let (is_member,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from accounts a
            join employees e on e.employee_id = a.employee_id
            where a.employee_id = $1
              and a.organization_id = $2
              and a.role = 'PRACTITIONER'
              and e.deleted_at is null
        )
        "#,
    )
    .bind(employee_id)
    .bind(organization_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_db_err)?;

    Ok(is_member)
}
