//! [`Unit`], [`Building`] and [`Project`] [`Database`] implementations.

use common::{
    operations::{By, Insert, Lock, Select},
    Money,
};
use rust_decimal::Decimal;
use tracerr::Traced;

use crate::{
    domain::{project, unit, Building, Project, Unit},
    infra::{
        database::{self, postgres::Connection, Postgres},
        Database,
    },
};

impl<C> Database<Select<By<Option<Unit>, unit::Id>>> for Postgres<C>
where
    C: Connection,
{
    type Ok = Option<Unit>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Unit>, unit::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let id = by.into_inner();

        const SQL: &str = "\
            SELECT id, kind, project_id, building_id, \
                   floor, status, price, price_currency \
            FROM units \
            WHERE id = $1::INT8";
        Ok(self
            .query_opt(SQL, &[&id])
            .await
            .map_err(tracerr::wrap!())?
            .map(|row| Unit {
                id: row.get("id"),
                kind: row.get("kind"),
                project_id: row.get("project_id"),
                building_id: row.get("building_id"),
                floor: row.get("floor"),
                status: row.get("status"),
                price: row.get::<_, Option<Decimal>>("price").map(|amount| {
                    Money {
                        amount,
                        currency: row.get("price_currency"),
                    }
                }),
            }))
    }
}

impl<C> Database<Insert<Unit>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(unit): Insert<Unit>,
    ) -> Result<Self::Ok, Self::Err> {
        let Unit {
            id,
            kind,
            project_id,
            building_id,
            floor,
            status,
            price,
        } = unit;
        let price_currency = price.map(|p| p.currency);
        let price = price.map(|p| p.amount);

        const SQL: &str = "\
            INSERT INTO units (\
                id, kind, project_id, building_id, \
                floor, status, price, price_currency\
            ) \
            VALUES (\
                $1::INT8, $2::INT2, $3::INT8, $4::INT8, \
                $5::INT2, $6::INT2, $7::NUMERIC, $8::INT2\
            ) \
            ON CONFLICT (id) DO UPDATE \
            SET kind = EXCLUDED.kind, \
                project_id = EXCLUDED.project_id, \
                building_id = EXCLUDED.building_id, \
                floor = EXCLUDED.floor, \
                status = EXCLUDED.status, \
                price = EXCLUDED.price, \
                price_currency = EXCLUDED.price_currency";
        self.exec(
            SQL,
            &[
                &id,
                &kind,
                &project_id,
                &building_id,
                &floor,
                &status,
                &price,
                &price_currency,
            ],
        )
        .await
        .map_err(tracerr::wrap!())
        .map(drop)
    }
}

impl<C> Database<Lock<By<Unit, unit::Id>>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Lock(by): Lock<By<Unit, unit::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        // Avoid subtle change for SQL.
        let id: unit::Id = by.into_inner();

        const SQL: &str = "\
            INSERT INTO units_lock \
            VALUES ($1::INT8) \
            ON CONFLICT (id) DO UPDATE \
            SET id = EXCLUDED.id";
        self.exec(SQL, &[&id])
            .await
            .map_err(tracerr::wrap!())
            .map(drop)
    }
}

impl<C> Database<Insert<Building>> for Postgres<C>
where
    C: Connection,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(building): Insert<Building>,
    ) -> Result<Self::Ok, Self::Err> {
        let Building {
            id,
            project_id,
            name,
        } = building;

        const SQL: &str = "\
            INSERT INTO buildings (id, project_id, name) \
            VALUES ($1::INT8, $2::INT8, $3::VARCHAR) \
            ON CONFLICT (id) DO UPDATE \
            SET project_id = EXCLUDED.project_id, \
                name = EXCLUDED.name";
        self.exec(SQL, &[&id, &project_id, &name])
            .await
            .map_err(tracerr::wrap!())
            .map(drop)
    }
}

impl<C> Database<Select<By<Option<Project>, project::Id>>> for Postgres<C>
where
    C: Connection,
{
    type Ok = Option<Project>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Project>, project::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let id = by.into_inner();

        const SQL: &str = "\
            SELECT id, name, city, pipeline, \
                   crm_enum, responsible_id, organization \
            FROM projects \
            WHERE id = $1::INT8";
        Ok(self
            .query_opt(SQL, &[&id])
            .await
            .map_err(tracerr::wrap!())?
            .map(|row| Project {
                id: row.get("id"),
                name: row.get("name"),
                city: row.get("city"),
                pipeline: row.get("pipeline"),
                crm_enum: row.get("crm_enum"),
                responsible_id: row.get("responsible_id"),
                organization: row.get("organization"),
            }))
    }
}
