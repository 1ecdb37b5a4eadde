//! [`Booking`]-related [`Database`] implementations.

use std::collections::HashMap;

use common::{
    money::Currency,
    operations::{By, Insert, Lock, Select, Update},
    Money,
};
use itertools::Itertools as _;
use postgres_types::ToSql;
use rust_decimal::Decimal;
use tokio_postgres::Row;
use tracerr::Traced;

use crate::{
    domain::{
        booking::{self, Linkage, Purchase},
        lead, Booking,
    },
    infra::{
        database::{self, postgres::Connection, Postgres},
        Database,
    },
    read,
};

/// Builds a [`Booking`] out of the provided `bookings` table [`Row`].
fn booking_from(row: &Row) -> Booking {
    Booking {
        id: row.get("id"),
        source: row.get("source"),
        user_id: row.get("user_id"),
        agent_id: row.get("agent_id"),
        project_id: row.get("project_id"),
        building_id: row.get("building_id"),
        unit_id: row.get("unit_id"),
        lead_id: row.get("lead_id"),
        status_id: row.get("status_id"),
        pipeline: row.get("pipeline"),
        stage: row.get("stage"),
        substage: row.get("substage"),
        active: row.get("active"),
        should_be_deactivated_by_timer: row
            .get("should_be_deactivated_by_timer"),
        deleted_in_crm: row.get("deleted_in_crm"),
        payment_amount: money_from(row, "payment_amount"),
        final_payment_amount: money_from(row, "final_payment_amount"),
        commission: row.get("commission"),
        commission_value: money_from(row, "commission_value"),
        payment_status: row.get("payment_status"),
        payment_order_id: row.get("payment_order_id"),
        purchase: Purchase {
            status: row.get("purchase_status"),
            started: row.get("purchase_started"),
            payment_method: row.get("payment_method"),
            agent_data_validated: row.get("agent_data_validated"),
            ddu_created: row.get("ddu_created"),
            ddu_uploaded_by_lawyer: row.get("ddu_uploaded_by_lawyer"),
            ddu_accepted: row.get("ddu_accepted"),
            escrow_uploaded: row.get("escrow_uploaded"),
            signing_date: row.get("signing_date"),
            signed: row.get("signed"),
        },
        extensions: u8::try_from(row.get::<_, i16>("extensions"))
            .unwrap_or(u8::MAX),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        until: row.get("until"),
    }
}

/// Reads an optional [`Money`] stored in the `column` and its `_currency`
/// sibling.
fn money_from(row: &Row, column: &str) -> Option<Money> {
    let amount = row.get::<_, Option<Decimal>>(column)?;
    Some(Money {
        amount,
        currency: row.get(format!("{column}_currency").as_str()),
    })
}

impl<C, IDs> Database<Select<By<HashMap<booking::Id, Booking>, IDs>>>
    for Postgres<C>
where
    C: Connection,
    IDs: AsRef<[booking::Id]>,
{
    type Ok = HashMap<booking::Id, Booking>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<HashMap<booking::Id, Booking>, IDs>>,
    ) -> Result<Self::Ok, Self::Err> {
        let ids = by.into_inner();
        // Avoid subtle change for SQL.
        let ids: &[booking::Id] = ids.as_ref();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let limit = i32::try_from(ids.len()).unwrap_or(i32::MAX);

        const SQL: &str = "\
            SELECT id, source, user_id, agent_id, \
                   project_id, building_id, unit_id, \
                   lead_id, status_id, pipeline, stage, substage, \
                   active, should_be_deactivated_by_timer, deleted_in_crm, \
                   payment_amount, payment_amount_currency, \
                   final_payment_amount, final_payment_amount_currency, \
                   commission, \
                   commission_value, commission_value_currency, \
                   payment_status, payment_order_id, \
                   purchase_status, purchase_started, payment_method, \
                   agent_data_validated, ddu_created, \
                   ddu_uploaded_by_lawyer, ddu_accepted, \
                   escrow_uploaded, signing_date, signed, \
                   extensions, created_at, expires_at, until \
            FROM bookings \
            WHERE id IN (SELECT unnest($1::UUID[]) LIMIT $2::INT4) \
            LIMIT $2::INT4";
        Ok(self
            .query(SQL, &[&ids, &limit])
            .await
            .map_err(tracerr::wrap!())?
            .iter()
            .map(|row| {
                let booking = booking_from(row);
                (booking.id, booking)
            })
            .collect())
    }
}

impl<C> Database<Select<By<Option<Booking>, booking::Id>>> for Postgres<C>
where
    C: Connection,
    Self: Database<
        Select<By<HashMap<booking::Id, Booking>, [booking::Id; 1]>>,
        Ok = HashMap<booking::Id, Booking>,
        Err = Traced<database::Error>,
    >,
{
    type Ok = Option<Booking>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Booking>, booking::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let id = by.into_inner();
        Ok(self
            .execute(Select(By::new([id])))
            .await
            .map_err(tracerr::wrap!())?
            .remove(&id))
    }
}

impl<C> Database<Select<By<Option<Booking>, lead::Id>>> for Postgres<C>
where
    C: Connection,
    Self: Database<
        Select<By<Option<Booking>, booking::Id>>,
        Ok = Option<Booking>,
        Err = Traced<database::Error>,
    >,
{
    type Ok = Option<Booking>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Booking>, lead::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let lead_id = by.into_inner();

        const SQL: &str = "\
            SELECT id \
            FROM bookings \
            WHERE lead_id = $1::INT8 \
            ORDER BY created_at DESC \
            LIMIT 1";
        let Some(row) = self
            .query_opt(SQL, &[&lead_id])
            .await
            .map_err(tracerr::wrap!())?
        else {
            return Ok(None);
        };

        let id: booking::Id = row.get("id");
        self.execute(Select(By::new(id)))
            .await
            .map_err(tracerr::wrap!())
    }
}

impl<C> Database<Select<By<Option<Booking>, booking::PaymentOrderId>>>
    for Postgres<C>
where
    C: Connection,
    Self: Database<
        Select<By<Option<Booking>, booking::Id>>,
        Ok = Option<Booking>,
        Err = Traced<database::Error>,
    >,
{
    type Ok = Option<Booking>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Booking>, booking::PaymentOrderId>>,
    ) -> Result<Self::Ok, Self::Err> {
        let order_id = by.into_inner();

        const SQL: &str = "\
            SELECT id \
            FROM bookings \
            WHERE payment_order_id = $1::VARCHAR \
            LIMIT 1";
        let Some(row) = self
            .query_opt(SQL, &[&order_id])
            .await
            .map_err(tracerr::wrap!())?
        else {
            return Ok(None);
        };

        let id: booking::Id = row.get("id");
        self.execute(Select(By::new(id)))
            .await
            .map_err(tracerr::wrap!())
    }
}

impl<C> Database<Select<By<Vec<Booking>, read::booking::ActiveInCrm>>>
    for Postgres<C>
where
    C: Connection,
    Self: Database<
        Select<By<HashMap<booking::Id, Booking>, Vec<booking::Id>>>,
        Ok = HashMap<booking::Id, Booking>,
        Err = Traced<database::Error>,
    >,
{
    type Ok = Vec<Booking>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        _: Select<By<Vec<Booking>, read::booking::ActiveInCrm>>,
    ) -> Result<Self::Ok, Self::Err> {
        const SQL: &str = "\
            SELECT id \
            FROM bookings \
            WHERE active \
              AND lead_id IS NOT NULL \
            ORDER BY created_at";
        let ids = self
            .query(SQL, &[])
            .await
            .map_err(tracerr::wrap!())?
            .into_iter()
            .map(|row| row.get("id"))
            .collect::<Vec<booking::Id>>();

        let mut bookings = self
            .execute(Select(By::new(ids.clone())))
            .await
            .map_err(tracerr::wrap!())?;
        Ok(ids.iter().filter_map(|id| bookings.remove(id)).collect())
    }
}

impl<C> Database<Select<By<Option<Booking>, read::booking::ActiveOnUnit>>>
    for Postgres<C>
where
    C: Connection,
    Self: Database<
        Select<By<Option<Booking>, booking::Id>>,
        Ok = Option<Booking>,
        Err = Traced<database::Error>,
    >,
{
    type Ok = Option<Booking>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Booking>, read::booking::ActiveOnUnit>>,
    ) -> Result<Self::Ok, Self::Err> {
        let read::booking::ActiveOnUnit { unit_id, except } = by.into_inner();

        const SQL: &str = "\
            SELECT id \
            FROM bookings \
            WHERE active \
              AND unit_id = $1::INT8 \
              AND id <> $2::UUID \
            LIMIT 1";
        let Some(row) = self
            .query_opt(SQL, &[&unit_id, &except])
            .await
            .map_err(tracerr::wrap!())?
        else {
            return Ok(None);
        };

        let id: booking::Id = row.get("id");
        self.execute(Select(By::new(id)))
            .await
            .map_err(tracerr::wrap!())
    }
}

/// Splits an optional [`Money`] into its amount and [`Currency`] columns.
fn split(money: Option<Money>) -> (Option<Decimal>, Option<Currency>) {
    (money.map(|m| m.amount), money.map(|m| m.currency))
}

impl<C> Database<Update<booking::Patch>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(patch): Update<booking::Patch>,
    ) -> Result<Self::Ok, Self::Err> {
        if patch.is_empty() {
            return Ok(());
        }
        let booking::Patch {
            id,
            active,
            should_be_deactivated_by_timer,
            deleted_in_crm,
            agent_id,
            lead_id,
            status_id,
            pipeline,
            stage,
            substage,
            linkage,
            payment_amount,
            final_payment_amount,
            commission,
            commission_value,
            payment_status,
            purchase,
            extensions,
            expires_at,
            until,
        } = patch;
        let extensions = extensions.map(i16::from);
        let payment_amount = payment_amount.map(split);
        let final_payment_amount = final_payment_amount.map(split);
        let commission_value = commission_value.map(split);

        let mut ps: Vec<&(dyn ToSql + Sync)> = vec![&id];
        let mut columns: Vec<(&str, &str, usize)> = Vec::new();
        macro_rules! set {
            ($column:literal, $ty:literal, $value:expr) => {{
                ps.push($value);
                columns.push(($column, $ty, ps.len()));
            }};
        }
        if let Some(v) = &active {
            set!("active", "BOOL", v);
        }
        if let Some(v) = &should_be_deactivated_by_timer {
            set!("should_be_deactivated_by_timer", "BOOL", v);
        }
        if let Some(v) = &deleted_in_crm {
            set!("deleted_in_crm", "BOOL", v);
        }
        if let Some(v) = &agent_id {
            set!("agent_id", "UUID", v);
        }
        if let Some(v) = &lead_id {
            set!("lead_id", "INT8", v);
        }
        if let Some(v) = &status_id {
            set!("status_id", "INT8", v);
        }
        if let Some(v) = &pipeline {
            set!("pipeline", "INT2", v);
        }
        if let Some(v) = &stage {
            set!("stage", "INT2", v);
        }
        if let Some(v) = &substage {
            set!("substage", "INT2", v);
        }
        if let Some(Linkage {
            project_id,
            building_id,
            unit_id,
        }) = &linkage
        {
            set!("project_id", "INT8", project_id);
            set!("building_id", "INT8", building_id);
            set!("unit_id", "INT8", unit_id);
        }
        if let Some((amount, currency)) = &payment_amount {
            set!("payment_amount", "NUMERIC", amount);
            set!("payment_amount_currency", "INT2", currency);
        }
        if let Some((amount, currency)) = &final_payment_amount {
            set!("final_payment_amount", "NUMERIC", amount);
            set!("final_payment_amount_currency", "INT2", currency);
        }
        if let Some(v) = &commission {
            set!("commission", "NUMERIC", v);
        }
        if let Some((amount, currency)) = &commission_value {
            set!("commission_value", "NUMERIC", amount);
            set!("commission_value_currency", "INT2", currency);
        }
        if let Some(v) = &payment_status {
            set!("payment_status", "INT2", v);
        }
        if let Some(p) = &purchase {
            set!("purchase_status", "INT2", &p.status);
            set!("purchase_started", "BOOL", &p.started);
            set!("payment_method", "INT2", &p.payment_method);
            set!("agent_data_validated", "BOOL", &p.agent_data_validated);
            set!("ddu_created", "BOOL", &p.ddu_created);
            set!("ddu_uploaded_by_lawyer", "BOOL", &p.ddu_uploaded_by_lawyer);
            set!("ddu_accepted", "BOOL", &p.ddu_accepted);
            set!("escrow_uploaded", "BOOL", &p.escrow_uploaded);
            set!("signing_date", "TIMESTAMPTZ", &p.signing_date);
            set!("signed", "BOOL", &p.signed);
        }
        if let Some(v) = &extensions {
            set!("extensions", "INT2", v);
        }
        if let Some(v) = &expires_at {
            set!("expires_at", "TIMESTAMPTZ", v);
        }
        if let Some(v) = &until {
            set!("until", "TIMESTAMPTZ", v);
        }

        let sql = format!(
            "UPDATE bookings \
             SET {assignments} \
             WHERE id = $1::UUID",
            assignments = columns.iter().format_with(", ", |(c, ty, idx), f| {
                f(&format_args!("{c} = ${idx}::{ty}"))
            }),
        );
        self.exec(&sql, ps.as_slice())
            .await
            .map_err(tracerr::wrap!())
            .map(drop)
    }
}

impl<C> Database<Lock<By<Booking, booking::Id>>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Lock(by): Lock<By<Booking, booking::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        // Avoid subtle change for SQL.
        let id: booking::Id = by.into_inner();

        const SQL: &str = "\
            INSERT INTO bookings_lock \
            VALUES ($1::UUID) \
            ON CONFLICT (id) DO UPDATE \
            SET id = EXCLUDED.id";
        self.exec(SQL, &[&id])
            .await
            .map_err(tracerr::wrap!())
            .map(drop)
    }
}

impl<C> Database<Insert<booking::LogEntry>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(entry): Insert<booking::LogEntry>,
    ) -> Result<Self::Ok, Self::Err> {
        let booking::LogEntry {
            id,
            booking_id,
            actor,
            content,
            created_at,
        } = entry;

        const SQL: &str = "\
            INSERT INTO booking_logs (\
                id, booking_id, actor, content, created_at\
            ) \
            VALUES (\
                $1::UUID, $2::UUID, $3::INT2, $4::TEXT, $5::TIMESTAMPTZ\
            )";
        self.exec(SQL, &[&id, &booking_id, &actor, &content, &created_at])
            .await
            .map_err(tracerr::wrap!())
            .map(drop)
    }
}
