//! [`User`]-related [`Database`] implementations.

use common::operations::{By, Select};
use tokio_postgres::Row;
use tracerr::Traced;

use crate::{
    domain::{user, User},
    infra::{
        database::{self, postgres::Connection, Postgres},
        Database,
    },
    read,
};

/// Builds a [`User`] out of the provided `users` table [`Row`].
fn user_from(row: &Row) -> User {
    User {
        id: row.get("id"),
        role: row.get("role"),
        name: row.get("name"),
        email: row.get("email"),
        contact_id: row.get("contact_id"),
    }
}

impl<C> Database<Select<By<Option<User>, user::Id>>> for Postgres<C>
where
    C: Connection,
{
    type Ok = Option<User>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<User>, user::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let id = by.into_inner();

        const SQL: &str = "\
            SELECT id, role, name, email, contact_id \
            FROM users \
            WHERE id = $1::UUID";
        Ok(self
            .query_opt(SQL, &[&id])
            .await
            .map_err(tracerr::wrap!())?
            .as_ref()
            .map(user_from))
    }
}

impl<C> Database<Select<By<Option<User>, read::user::AgentAmong>>>
    for Postgres<C>
where
    C: Connection,
{
    type Ok = Option<User>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<User>, read::user::AgentAmong>>,
    ) -> Result<Self::Ok, Self::Err> {
        let read::user::AgentAmong(contacts) = by.into_inner();
        if contacts.is_empty() {
            return Ok(None);
        }
        let role = user::Role::Agent;

        const SQL: &str = "\
            SELECT id, role, name, email, contact_id \
            FROM users \
            WHERE role = $1::INT2 \
              AND contact_id = ANY($2::INT8[]) \
            ORDER BY array_position($2::INT8[], contact_id) \
            LIMIT 1";
        Ok(self
            .query_opt(SQL, &[&role, &contacts])
            .await
            .map_err(tracerr::wrap!())?
            .as_ref()
            .map(user_from))
    }
}
