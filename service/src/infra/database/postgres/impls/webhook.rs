//! Webhook [`Request`]-related [`Database`] implementations.

use common::operations::{By, Insert, Lock, Select, Update};
use tokio_postgres::Row;
use tracerr::Traced;

use crate::{
    domain::webhook::{self, Request},
    infra::{
        database::{self, postgres::Connection, Postgres},
        Database,
    },
    read,
};

impl<C> Database<Insert<Request>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(req): Insert<Request>,
    ) -> Result<Self::Ok, Self::Err> {
        let Request {
            id,
            category,
            body,
            hash,
            subject,
            received_at,
            outcome,
        } = req;

        const SQL: &str = "\
            INSERT INTO webhook_requests (\
                id, category, body, hash, subject, received_at, outcome\
            ) \
            VALUES (\
                $1::UUID, $2::INT2, $3::TEXT, $4::INT8, $5::TEXT, \
                $6::TIMESTAMPTZ, $7::INT2\
            )";
        self.exec(
            SQL,
            &[
                &id,
                &category,
                &body,
                &hash,
                &subject,
                &received_at,
                &outcome,
            ],
        )
        .await
        .map_err(tracerr::wrap!())
        .map(drop)
    }
}

impl<C> Database<Update<Request>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(req): Update<Request>,
    ) -> Result<Self::Ok, Self::Err> {
        const SQL: &str = "\
            UPDATE webhook_requests \
            SET outcome = $2::INT2 \
            WHERE id = $1::UUID";
        self.exec(SQL, &[&req.id, &req.outcome])
            .await
            .map_err(tracerr::wrap!())
            .map(drop)
    }
}

impl<C> Database<Lock<By<Request, webhook::Subject>>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Lock(by): Lock<By<Request, webhook::Subject>>,
    ) -> Result<Self::Ok, Self::Err> {
        let subject = by.into_inner();

        const SQL: &str = "\
            INSERT INTO webhook_subjects_lock \
            VALUES ($1::TEXT) \
            ON CONFLICT (subject) DO UPDATE \
            SET subject = EXCLUDED.subject";
        self.exec(SQL, &[&subject])
            .await
            .map_err(tracerr::wrap!())
            .map(drop)
    }
}

impl<C> Database<Select<By<Option<Request>, read::webhook::Latest>>>
    for Postgres<C>
where
    C: Connection,
{
    type Ok = Option<Request>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Request>, read::webhook::Latest>>,
    ) -> Result<Self::Ok, Self::Err> {
        let read::webhook::Latest {
            subject,
            since,
            except,
        } = by.into_inner();

        const SQL: &str = "\
            SELECT id, category, body, hash, subject, received_at, outcome \
            FROM webhook_requests \
            WHERE subject = $1::TEXT \
              AND received_at >= $2::TIMESTAMPTZ \
              AND id <> $3::UUID \
            ORDER BY seq DESC \
            LIMIT 1";
        Ok(self
            .query_opt(SQL, &[&subject, &since, &except])
            .await
            .map_err(tracerr::wrap!())?
            .as_ref()
            .map(request_from))
    }
}

/// Reads a [`Request`] out of the provided [`Row`].
fn request_from(row: &Row) -> Request {
    Request {
        id: row.get("id"),
        category: row.get("category"),
        body: row.get("body"),
        hash: row.get("hash"),
        subject: row.get("subject"),
        received_at: row.get("received_at"),
        outcome: row.get("outcome"),
    }
}
