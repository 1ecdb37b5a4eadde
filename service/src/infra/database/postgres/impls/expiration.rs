//! Expiration [`Check`]-related [`Database`] implementations.

use common::operations::{By, Delete, Insert, Select, Update};
use tracerr::Traced;

use crate::{
    domain::expiration::{self, Check},
    infra::{
        database::{self, postgres::Connection, Postgres},
        Database,
    },
};

impl<C> Database<Insert<Check>> for Postgres<C>
where
    C: Connection,
    Self: Database<Update<Check>, Ok = (), Err = Traced<database::Error>>,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(check): Insert<Check>,
    ) -> Result<Self::Ok, Self::Err> {
        self.execute(Update(check)).await.map_err(tracerr::wrap!())
    }
}

/// Upserts the [`Check`] of its [`Booking`], so a [`Booking`] has at most
/// one pending [`Check`].
///
/// [`Booking`]: crate::domain::Booking
impl<C> Database<Update<Check>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(check): Update<Check>,
    ) -> Result<Self::Ok, Self::Err> {
        let Check {
            id,
            booking_id,
            fire_at,
            fallback,
            attempts,
        } = check;
        let attempts = i16::from(attempts);

        const SQL: &str = "\
            INSERT INTO expiration_checks (\
                id, booking_id, fire_at, fallback, attempts\
            ) \
            VALUES (\
                $1::UUID, $2::UUID, $3::TIMESTAMPTZ, $4::INT2, $5::INT2\
            ) \
            ON CONFLICT (booking_id) DO UPDATE \
            SET id = EXCLUDED.id, \
                fire_at = EXCLUDED.fire_at, \
                fallback = EXCLUDED.fallback, \
                attempts = EXCLUDED.attempts";
        self.exec(SQL, &[&id, &booking_id, &fire_at, &fallback, &attempts])
            .await
            .map_err(tracerr::wrap!())
            .map(drop)
    }
}

impl<C> Database<Select<By<Vec<Check>, expiration::Due>>> for Postgres<C>
where
    C: Connection,
{
    type Ok = Vec<Check>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Vec<Check>, expiration::Due>>,
    ) -> Result<Self::Ok, Self::Err> {
        let expiration::Due { at, limit } = by.into_inner();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        // Rows are held by the surrounding transaction, so concurrent pollers
        // never fire the same `Check`.
        const SQL: &str = "\
            SELECT id, booking_id, fire_at, fallback, attempts \
            FROM expiration_checks \
            WHERE fire_at <= $1::TIMESTAMPTZ \
            ORDER BY fire_at \
            LIMIT $2::INT8 \
            FOR UPDATE SKIP LOCKED";
        Ok(self
            .query(SQL, &[&at, &limit])
            .await
            .map_err(tracerr::wrap!())?
            .into_iter()
            .map(|row| Check {
                id: row.get("id"),
                booking_id: row.get("booking_id"),
                fire_at: row.get("fire_at"),
                fallback: row.get("fallback"),
                attempts: u8::try_from(row.get::<_, i16>("attempts"))
                    .unwrap_or(u8::MAX),
            })
            .collect())
    }
}

impl<C> Database<Delete<By<Check, expiration::Id>>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Delete(by): Delete<By<Check, expiration::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        // Avoid subtle change for SQL.
        let id: expiration::Id = by.into_inner();

        const SQL: &str = "\
            DELETE FROM expiration_checks \
            WHERE id = $1::UUID";
        self.exec(SQL, &[&id])
            .await
            .map_err(tracerr::wrap!())
            .map(drop)
    }
}
