//! Infrastructure layer.

pub mod catalog;
pub mod crm;
pub mod database;
pub mod external;
pub mod http;
pub mod inventory;
#[cfg(test)]
pub(crate) mod mock;
pub mod notifier;
pub mod payment;

use common::operations::{
    By, Commit, Delete, Insert, Lock, Select, Transact, Update,
};
use tracerr::Traced;

use crate::{
    domain::{
        booking, expiration, lead, project, unit, user, webhook, Booking,
        Building, Lead, Project, Unit, User,
    },
    read,
};

pub use self::{
    catalog::Catalog, crm::Crm, database::Database, external::External,
    inventory::Inventory, notifier::Notifier, payment::Payment,
};
#[cfg(feature = "postgres")]
pub use self::database::{postgres, Postgres};

/// Shortcut for a [`Database`] error.
type DbErr = Traced<database::Error>;

/// [`Database`] operations the [`Service`] stores its state with.
///
/// [`Service`]: crate::Service
pub trait Store:
    Database<Select<By<Option<Booking>, booking::Id>>, Ok = Option<Booking>, Err = DbErr>
    + Database<Select<By<Option<Booking>, lead::Id>>, Ok = Option<Booking>, Err = DbErr>
    + Database<
        Select<By<Option<Booking>, booking::PaymentOrderId>>,
        Ok = Option<Booking>,
        Err = DbErr,
    > + Database<
        Select<By<Vec<Booking>, read::booking::ActiveInCrm>>,
        Ok = Vec<Booking>,
        Err = DbErr,
    > + Database<
        Select<By<Option<Booking>, read::booking::ActiveOnUnit>>,
        Ok = Option<Booking>,
        Err = DbErr,
    > + Database<Update<booking::Patch>, Ok = (), Err = DbErr>
    + Database<Lock<By<Booking, booking::Id>>, Ok = (), Err = DbErr>
    + Database<Insert<booking::LogEntry>, Ok = (), Err = DbErr>
    + Database<Select<By<Option<Unit>, unit::Id>>, Ok = Option<Unit>, Err = DbErr>
    + Database<Lock<By<Unit, unit::Id>>, Ok = (), Err = DbErr>
    + Database<Insert<Unit>, Ok = (), Err = DbErr>
    + Database<Insert<Building>, Ok = (), Err = DbErr>
    + Database<
        Select<By<Option<Project>, project::Id>>,
        Ok = Option<Project>,
        Err = DbErr,
    > + Database<Select<By<Option<User>, user::Id>>, Ok = Option<User>, Err = DbErr>
    + Database<
        Select<By<Option<User>, read::user::AgentAmong>>,
        Ok = Option<User>,
        Err = DbErr,
    > + Database<Insert<webhook::Request>, Ok = (), Err = DbErr>
    + Database<Update<webhook::Request>, Ok = (), Err = DbErr>
    + Database<Lock<By<webhook::Request, webhook::Subject>>, Ok = (), Err = DbErr>
    + Database<
        Select<By<Option<webhook::Request>, read::webhook::Latest>>,
        Ok = Option<webhook::Request>,
        Err = DbErr,
    > + Database<Insert<expiration::Check>, Ok = (), Err = DbErr>
    + Database<Update<expiration::Check>, Ok = (), Err = DbErr>
    + Database<
        Select<By<Vec<expiration::Check>, expiration::Due>>,
        Ok = Vec<expiration::Check>,
        Err = DbErr,
    > + Database<Delete<By<expiration::Check, expiration::Id>>, Ok = (), Err = DbErr>
{
}

impl<T> Store for T where
    T: Database<Select<By<Option<Booking>, booking::Id>>, Ok = Option<Booking>, Err = DbErr>
        + Database<Select<By<Option<Booking>, lead::Id>>, Ok = Option<Booking>, Err = DbErr>
        + Database<
            Select<By<Option<Booking>, booking::PaymentOrderId>>,
            Ok = Option<Booking>,
            Err = DbErr,
        > + Database<
            Select<By<Vec<Booking>, read::booking::ActiveInCrm>>,
            Ok = Vec<Booking>,
            Err = DbErr,
        > + Database<
            Select<By<Option<Booking>, read::booking::ActiveOnUnit>>,
            Ok = Option<Booking>,
            Err = DbErr,
        > + Database<Update<booking::Patch>, Ok = (), Err = DbErr>
        + Database<Lock<By<Booking, booking::Id>>, Ok = (), Err = DbErr>
        + Database<Insert<booking::LogEntry>, Ok = (), Err = DbErr>
        + Database<Select<By<Option<Unit>, unit::Id>>, Ok = Option<Unit>, Err = DbErr>
        + Database<Lock<By<Unit, unit::Id>>, Ok = (), Err = DbErr>
        + Database<Insert<Unit>, Ok = (), Err = DbErr>
        + Database<Insert<Building>, Ok = (), Err = DbErr>
        + Database<
            Select<By<Option<Project>, project::Id>>,
            Ok = Option<Project>,
            Err = DbErr,
        > + Database<Select<By<Option<User>, user::Id>>, Ok = Option<User>, Err = DbErr>
        + Database<
            Select<By<Option<User>, read::user::AgentAmong>>,
            Ok = Option<User>,
            Err = DbErr,
        > + Database<Insert<webhook::Request>, Ok = (), Err = DbErr>
        + Database<Update<webhook::Request>, Ok = (), Err = DbErr>
        + Database<Lock<By<webhook::Request, webhook::Subject>>, Ok = (), Err = DbErr>
        + Database<
            Select<By<Option<webhook::Request>, read::webhook::Latest>>,
            Ok = Option<webhook::Request>,
            Err = DbErr,
        > + Database<Insert<expiration::Check>, Ok = (), Err = DbErr>
        + Database<Update<expiration::Check>, Ok = (), Err = DbErr>
        + Database<
            Select<By<Vec<expiration::Check>, expiration::Due>>,
            Ok = Vec<expiration::Check>,
            Err = DbErr,
        > + Database<Delete<By<expiration::Check, expiration::Id>>, Ok = (), Err = DbErr>
{
}

/// [`Store`] able to open transactions.
pub trait Transactional:
    Store + Database<Transact, Ok: Store + Database<Commit, Ok = (), Err = DbErr>, Err = DbErr>
{
}

impl<T> Transactional for T where
    T: Store
        + Database<
            Transact,
            Ok: Store + Database<Commit, Ok = (), Err = DbErr>,
            Err = DbErr,
        >
{
}

/// External systems the [`Service`] keeps consistent.
///
/// [`Service`]: crate::Service
pub trait Integrations:
    Crm<Select<By<Option<Lead>, lead::Id>>, Ok = Option<Lead>, Err = Traced<crm::Error>>
    + Crm<Select<By<Vec<Lead>, Vec<lead::Id>>>, Ok = Vec<Lead>, Err = Traced<crm::Error>>
    + Crm<Insert<crm::NewLead>, Ok = Lead, Err = Traced<crm::Error>>
    + Crm<Update<crm::LeadPatch>, Ok = (), Err = Traced<crm::Error>>
    + Crm<Insert<crm::Note>, Ok = (), Err = Traced<crm::Error>>
    + Crm<Insert<crm::NewTask>, Ok = lead::TaskId, Err = Traced<crm::Error>>
    + Inventory<
        Select<By<Option<unit::Status>, unit::Id>>,
        Ok = Option<unit::Status>,
        Err = Traced<inventory::Error>,
    > + Inventory<
        Insert<inventory::Deal>,
        Ok = inventory::Booking,
        Err = Traced<inventory::Error>,
    > + Inventory<
        Delete<By<inventory::Deal, lead::Id>>,
        Ok = inventory::Unbooking,
        Err = Traced<inventory::Error>,
    > + Catalog<Update<catalog::StatusChange>, Ok = (), Err = Traced<catalog::Error>>
    + Catalog<
        Select<By<Option<catalog::Listing>, catalog::Lookup>>,
        Ok = Option<catalog::Listing>,
        Err = Traced<catalog::Error>,
    > + Payment<
        Select<By<payment::OrderStatus, booking::PaymentOrderId>>,
        Ok = payment::OrderStatus,
        Err = Traced<payment::Error>,
    > + Notifier<Insert<notifier::Email>, Ok = (), Err = Traced<notifier::Error>>
{
}

impl<T> Integrations for T where
    T: Crm<Select<By<Option<Lead>, lead::Id>>, Ok = Option<Lead>, Err = Traced<crm::Error>>
        + Crm<Select<By<Vec<Lead>, Vec<lead::Id>>>, Ok = Vec<Lead>, Err = Traced<crm::Error>>
        + Crm<Insert<crm::NewLead>, Ok = Lead, Err = Traced<crm::Error>>
        + Crm<Update<crm::LeadPatch>, Ok = (), Err = Traced<crm::Error>>
        + Crm<Insert<crm::Note>, Ok = (), Err = Traced<crm::Error>>
        + Crm<Insert<crm::NewTask>, Ok = lead::TaskId, Err = Traced<crm::Error>>
        + Inventory<
            Select<By<Option<unit::Status>, unit::Id>>,
            Ok = Option<unit::Status>,
            Err = Traced<inventory::Error>,
        > + Inventory<
            Insert<inventory::Deal>,
            Ok = inventory::Booking,
            Err = Traced<inventory::Error>,
        > + Inventory<
            Delete<By<inventory::Deal, lead::Id>>,
            Ok = inventory::Unbooking,
            Err = Traced<inventory::Error>,
        > + Catalog<Update<catalog::StatusChange>, Ok = (), Err = Traced<catalog::Error>>
        + Catalog<
            Select<By<Option<catalog::Listing>, catalog::Lookup>>,
            Ok = Option<catalog::Listing>,
            Err = Traced<catalog::Error>,
        > + Payment<
            Select<By<payment::OrderStatus, booking::PaymentOrderId>>,
            Ok = payment::OrderStatus,
            Err = Traced<payment::Error>,
        > + Notifier<Insert<notifier::Email>, Ok = (), Err = Traced<notifier::Error>>
{
}
