//! In-memory [`Database`] and external systems for tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use common::{
    operations::{By, Commit, Delete, Insert, Lock, Select, Transact, Update},
    Handler,
};
use secrecy::SecretString;
use tracerr::Traced;

use crate::{
    domain::{
        booking::{self, fixture, Substage},
        expiration, lead, pipeline, project, unit, user, webhook, Booking,
        Building, Lead, Pipeline, Project, Unit, User,
    },
    event,
    infra::{catalog, crm, database, inventory, notifier, payment},
    read, task, Config, Service,
};

/// [`Service`] backed by the in-memory mocks.
pub(crate) type MockService = Service<Memory, Fake>;

/// Creates a new [`Config`] for tests.
pub(crate) fn config() -> Config {
    Config {
        pipelines: pipeline::Mapping::new(&pipeline::Table::default())
            .unwrap(),
        fields: lead::Fields::default(),
        free_booking_period: Duration::from_secs(30 * 60),
        paid_booking_period: Duration::from_secs(20 * 24 * 60 * 60),
        max_extensions: 2,
        expiration_fallback: Substage::Unrealized,
        webhook_secret: SecretString::from("webhook-secret"),
        webhook_dedup_window: Duration::from_secs(60),
        payment_secret: SecretString::from("payment-secret"),
        reconcile_bookings: task::reconcile_bookings::Config {
            interval: Duration::from_secs(60 * 60),
            batch_size: 2,
        },
        fire_expiration_checks: task::fire_expiration_checks::Config {
            interval: Duration::from_secs(1),
            limit: 10,
            max_attempts: 3,
            retry_after: Duration::from_secs(60),
        },
    }
}

/// Creates a new [`MockService`] along with the queue of its emitted
/// [`event::Event`]s.
pub(crate) fn service() -> (MockService, event::Queue) {
    let (events, queue) = event::Bus::new();
    let svc = Service {
        config: config(),
        database: Memory::default(),
        external: Fake::default(),
        events,
    };
    (svc, queue)
}

/// Drains all the emitted [`event::Event`]s from the provided queue.
pub(crate) fn events(queue: &mut event::Queue) -> Vec<event::Event> {
    let mut events = vec![];
    while let Some(e) = queue.try_recv() {
        events.push(e);
    }
    events
}

/// Seeds a free [`Unit`] of the Tyumen [`Project`] known everywhere.
pub(crate) fn seed_unit(svc: &MockService, id: unit::Id) -> Unit {
    let project = Project {
        id: project::Id::from(1),
        name: project::Name::new("Европейский квартал").unwrap(),
        city: project::City::new("tmn").unwrap(),
        pipeline: Pipeline::Tyumen,
        crm_enum: Some(lead::EnumId::from(1_i64)),
        responsible_id: None,
        organization: None,
    };
    let unit = Unit {
        id,
        kind: unit::Kind::Flat,
        project_id: project.id,
        building_id: project::BuildingId::from(10),
        floor: Some(3),
        status: unit::Status::Free,
        price: None,
    };
    {
        let mut state = svc.database().state();
        drop(state.projects.insert(project.id, project));
        drop(state.units.insert(id, unit.clone()));
    }
    {
        let mut world = svc.external().world();
        drop(world.inventory.insert(id, (unit::Status::Free, None)));
        drop(world.catalog.insert(unit.catalog_ref(), unit::Status::Free));
    }
    unit
}

/// Seeds an inactive [`Booking`] of the provided [`Unit`] with an agent
/// assigned.
pub(crate) fn seed_booking(svc: &MockService, unit_id: unit::Id) -> Booking {
    let agent = User {
        id: user::Id::new(),
        role: user::Role::Agent,
        name: "Agent".into(),
        email: user::Email::new("agent@example.com"),
        contact_id: Some(lead::ContactId::from(77_i64)),
    };
    let mut booking = fixture::booking(unit_id);
    booking.agent_id = Some(agent.id);

    let mut state = svc.database().state();
    drop(state.users.insert(agent.id, agent));
    drop(state.bookings.insert(booking.id, booking.clone()));
    booking
}

/// Seeds a [`Booking`] activated on the provided [`Unit`] under the provided
/// CRM lead in the Tyumen [`Pipeline`].
pub(crate) fn seed_active_booking(
    svc: &MockService,
    unit: &Unit,
    lead_id: lead::Id,
) -> Booking {
    let status_id = svc
        .config()
        .pipelines
        .status_of(Pipeline::Tyumen, Substage::Booking)
        .unwrap();
    let pipeline_id = svc
        .config()
        .pipelines
        .pipeline_id(Pipeline::Tyumen)
        .unwrap();

    let mut booking = seed_booking(svc, unit.id);
    booking::Patch {
        active: Some(true),
        should_be_deactivated_by_timer: Some(true),
        lead_id: Some(Some(lead_id)),
        status_id: Some(Some(status_id)),
        pipeline: Some(Some(Pipeline::Tyumen)),
        ..booking::Patch::new(booking.id)
    }
    .with_substage(Substage::Booking)
    .apply(&mut booking);
    drop(
        svc.database()
            .state()
            .bookings
            .insert(booking.id, booking.clone()),
    );
    drop(svc.database().state().units.insert(
        unit.id,
        Unit {
            status: unit::Status::Booked,
            ..unit.clone()
        },
    ));

    let mut custom_fields = lead::CustomFields::default();
    custom_fields.insert(
        svc.config().fields.unit,
        vec![lead::FieldValue::text(unit.id.to_string())],
    );
    let mut world = svc.external().world();
    drop(world.leads.insert(
        lead_id,
        Lead {
            id: lead_id,
            pipeline_id,
            status_id,
            custom_fields,
            ..Lead::default()
        },
    ));
    drop(
        world
            .inventory
            .insert(unit.id, (unit::Status::Booked, Some(lead_id))),
    );
    drop(world.catalog.insert(unit.catalog_ref(), unit::Status::Booked));
    booking
}

/// Implements a [`Handler`] of a mock.
macro_rules! handle {
    ($mock:ty, $args:ty => $ok:ty, $err:ty, |$this:ident, $arg:pat_param| $body:block) => {
        impl Handler<$args> for $mock {
            type Ok = $ok;
            type Err = Traced<$err>;

            async fn execute(&self, $arg: $args) -> Result<Self::Ok, Self::Err> {
                let $this = self;
                $body
            }
        }
    };
}

/// State of a [`Memory`] database.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) bookings: HashMap<booking::Id, Booking>,
    pub(crate) units: HashMap<unit::Id, Unit>,
    pub(crate) buildings: HashMap<project::BuildingId, Building>,
    pub(crate) projects: HashMap<project::Id, Project>,
    pub(crate) users: HashMap<user::Id, User>,
    pub(crate) logs: Vec<booking::LogEntry>,
    pub(crate) webhooks: Vec<webhook::Request>,
    pub(crate) checks: Vec<expiration::Check>,
}

/// In-memory [`Database`].
///
/// Transactions share the state and are never rolled back.
///
/// [`Database`]: crate::infra::Database
#[derive(Clone, Debug, Default)]
pub(crate) struct Memory(Arc<Mutex<State>>);

impl Memory {
    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap()
    }

    pub(crate) fn booking(&self, id: booking::Id) -> Booking {
        self.state().bookings[&id].clone()
    }

    pub(crate) fn unit(&self, id: unit::Id) -> Unit {
        self.state().units[&id].clone()
    }
}

type DbErr = database::Error;

handle!(Memory, Transact => Memory, DbErr, |this, _| { Ok(this.clone()) });
handle!(Memory, Commit => (), DbErr, |_this, _| { Ok(()) });

handle!(
    Memory,
    Select<By<Option<Booking>, booking::Id>> => Option<Booking>, DbErr,
    |this, Select(by)| { Ok(this.state().bookings.get(&by.into_inner()).cloned()) }
);

handle!(
    Memory,
    Select<By<Option<Booking>, lead::Id>> => Option<Booking>, DbErr,
    |this, Select(by)| {
        let lead_id = by.into_inner();
        Ok(this
            .state()
            .bookings
            .values()
            .filter(|b| b.lead_id == Some(lead_id))
            .max_by_key(|b| b.created_at)
            .cloned())
    }
);

handle!(
    Memory,
    Select<By<Option<Booking>, booking::PaymentOrderId>> => Option<Booking>, DbErr,
    |this, Select(by)| {
        let order_id = by.into_inner();
        Ok(this
            .state()
            .bookings
            .values()
            .find(|b| b.active && b.payment_order_id.as_ref() == Some(&order_id))
            .cloned())
    }
);

handle!(
    Memory,
    Select<By<Vec<Booking>, read::booking::ActiveInCrm>> => Vec<Booking>, DbErr,
    |this, _| {
        Ok(this
            .state()
            .bookings
            .values()
            .filter(|b| b.active && b.lead_id.is_some())
            .cloned()
            .collect())
    }
);

handle!(
    Memory,
    Select<By<Option<Booking>, read::booking::ActiveOnUnit>> => Option<Booking>, DbErr,
    |this, Select(by)| {
        let read::booking::ActiveOnUnit { unit_id, except } = by.into_inner();
        Ok(this
            .state()
            .bookings
            .values()
            .find(|b| b.active && b.unit_id == Some(unit_id) && b.id != except)
            .cloned())
    }
);

handle!(
    Memory,
    Update<booking::Patch> => (), DbErr,
    |this, Update(patch)| {
        if let Some(b) = this.state().bookings.get_mut(&patch.id) {
            patch.apply(b);
        }
        Ok(())
    }
);

handle!(Memory, Lock<By<Booking, booking::Id>> => (), DbErr, |_this, _| { Ok(()) });
handle!(Memory, Lock<By<Unit, unit::Id>> => (), DbErr, |_this, _| { Ok(()) });

handle!(
    Memory,
    Insert<booking::LogEntry> => (), DbErr,
    |this, Insert(entry)| {
        this.state().logs.push(entry);
        Ok(())
    }
);

handle!(
    Memory,
    Select<By<Option<Unit>, unit::Id>> => Option<Unit>, DbErr,
    |this, Select(by)| { Ok(this.state().units.get(&by.into_inner()).cloned()) }
);

handle!(
    Memory,
    Insert<Unit> => (), DbErr,
    |this, Insert(unit)| {
        drop(this.state().units.insert(unit.id, unit));
        Ok(())
    }
);

handle!(
    Memory,
    Insert<Building> => (), DbErr,
    |this, Insert(building)| {
        drop(this.state().buildings.insert(building.id, building));
        Ok(())
    }
);

handle!(
    Memory,
    Select<By<Option<Project>, project::Id>> => Option<Project>, DbErr,
    |this, Select(by)| { Ok(this.state().projects.get(&by.into_inner()).cloned()) }
);

handle!(
    Memory,
    Select<By<Option<User>, user::Id>> => Option<User>, DbErr,
    |this, Select(by)| { Ok(this.state().users.get(&by.into_inner()).cloned()) }
);

handle!(
    Memory,
    Select<By<Option<User>, read::user::AgentAmong>> => Option<User>, DbErr,
    |this, Select(by)| {
        let read::user::AgentAmong(contacts) = by.into_inner();
        Ok(this
            .state()
            .users
            .values()
            .find(|u| {
                u.role == user::Role::Agent
                    && u.contact_id.is_some_and(|c| contacts.contains(&c))
            })
            .cloned())
    }
);

handle!(
    Memory,
    Insert<webhook::Request> => (), DbErr,
    |this, Insert(request)| {
        this.state().webhooks.push(request);
        Ok(())
    }
);

handle!(
    Memory,
    Update<webhook::Request> => (), DbErr,
    |this, Update(request)| {
        if let Some(r) = this
            .state()
            .webhooks
            .iter_mut()
            .find(|r| r.id == request.id)
        {
            *r = request;
        }
        Ok(())
    }
);

handle!(
    Memory,
    Lock<By<webhook::Request, webhook::Subject>> => (), DbErr,
    |_this, _| { Ok(()) }
);

handle!(
    Memory,
    Select<By<Option<webhook::Request>, read::webhook::Latest>> => Option<webhook::Request>, DbErr,
    |this, Select(by)| {
        let read::webhook::Latest { subject, since, except } = by.into_inner();
        Ok(this
            .state()
            .webhooks
            .iter()
            .rev()
            .find(|r| {
                r.id != except
                    && r.subject.as_ref() == Some(&subject)
                    && r.received_at >= since
            })
            .cloned())
    }
);

handle!(
    Memory,
    Insert<expiration::Check> => (), DbErr,
    |this, Insert(check)| {
        let mut state = this.state();
        match state.checks.iter_mut().find(|c| c.booking_id == check.booking_id) {
            Some(c) => *c = check,
            None => state.checks.push(check),
        }
        Ok(())
    }
);

handle!(
    Memory,
    Update<expiration::Check> => (), DbErr,
    |this, Update(check)| {
        if let Some(c) = this
            .state()
            .checks
            .iter_mut()
            .find(|c| c.booking_id == check.booking_id)
        {
            *c = check;
        }
        Ok(())
    }
);

handle!(
    Memory,
    Select<By<Vec<expiration::Check>, expiration::Due>> => Vec<expiration::Check>, DbErr,
    |this, Select(by)| {
        let expiration::Due { at, limit } = by.into_inner();
        let mut due = this
            .state()
            .checks
            .iter()
            .filter(|c| c.fire_at.coerce() <= at)
            .copied()
            .collect::<Vec<_>>();
        due.sort_by_key(|c| c.fire_at);
        due.truncate(limit);
        Ok(due)
    }
);

handle!(
    Memory,
    Delete<By<expiration::Check, expiration::Id>> => (), DbErr,
    |this, Delete(by)| {
        let id = by.into_inner();
        this.state().checks.retain(|c| c.id != id);
        Ok(())
    }
);

/// State of the [`Fake`] external systems.
#[derive(Debug, Default)]
pub(crate) struct World {
    /// CRM leads.
    pub(crate) leads: HashMap<lead::Id, Lead>,

    /// Inventory units along with the deal holding them.
    pub(crate) inventory: HashMap<unit::Id, (unit::Status, Option<lead::Id>)>,

    /// Catalog unit statuses.
    pub(crate) catalog: HashMap<unit::CatalogRef, unit::Status>,

    /// Catalog unit listings.
    pub(crate) listings: HashMap<unit::Id, catalog::Listing>,

    /// Payment gateway orders.
    pub(crate) orders: HashMap<booking::PaymentOrderId, payment::OrderStatus>,

    /// Created CRM leads.
    pub(crate) created_leads: Vec<crm::NewLead>,

    /// Issued CRM lead updates.
    pub(crate) lead_updates: Vec<crm::LeadPatch>,

    /// Created CRM notes.
    pub(crate) notes: Vec<crm::Note>,

    /// Created CRM tasks.
    pub(crate) tasks: Vec<crm::NewTask>,

    /// Issued inventory booking calls.
    pub(crate) book_calls: usize,

    /// Issued inventory unbooking calls.
    pub(crate) unbook_calls: usize,

    /// Sent emails.
    pub(crate) emails: Vec<notifier::Email>,

    /// Indicator whether CRM batch fetches fail.
    pub(crate) crm_batches_fail: bool,
}

/// Fake external systems counting every call.
#[derive(Clone, Debug, Default)]
pub(crate) struct Fake(Arc<Mutex<World>>);

impl Fake {
    pub(crate) fn world(&self) -> MutexGuard<'_, World> {
        self.0.lock().unwrap()
    }
}

handle!(
    Fake,
    Select<By<Option<Lead>, lead::Id>> => Option<Lead>, crm::Error,
    |this, Select(by)| { Ok(this.world().leads.get(&by.into_inner()).cloned()) }
);

handle!(
    Fake,
    Select<By<Vec<Lead>, Vec<lead::Id>>> => Vec<Lead>, crm::Error,
    |this, Select(by)| {
        let world = this.world();
        if world.crm_batches_fail {
            return Err(tracerr::new!(crm::Error::Status {
                status: 502,
                body: "Bad Gateway".into(),
            }));
        }
        Ok(by
            .into_inner()
            .into_iter()
            .filter_map(|id| world.leads.get(&id).cloned())
            .collect())
    }
);

handle!(
    Fake,
    Insert<crm::NewLead> => Lead, crm::Error,
    |this, Insert(new)| {
        let mut world = this.world();
        let id = lead::Id::from(1000 + i64::try_from(world.leads.len()).unwrap());
        let lead = Lead {
            id,
            pipeline_id: new.pipeline_id,
            status_id: new.status_id,
            responsible_user_id: new.responsible_user_id,
            is_deleted: false,
            contacts: new.contacts.clone(),
            custom_fields: new.custom_fields.clone(),
        };
        drop(world.leads.insert(id, lead.clone()));
        world.created_leads.push(new);
        Ok(lead)
    }
);

handle!(
    Fake,
    Update<crm::LeadPatch> => (), crm::Error,
    |this, Update(patch)| {
        let mut world = this.world();
        let Some(lead) = world.leads.get_mut(&patch.id) else {
            return Err(tracerr::new!(crm::Error::Status {
                status: 404,
                body: String::new(),
            }));
        };
        if let Some(id) = patch.pipeline_id {
            lead.pipeline_id = id;
        }
        if let Some(id) = patch.status_id {
            lead.status_id = id;
        }
        world.lead_updates.push(patch);
        Ok(())
    }
);

handle!(
    Fake,
    Insert<crm::Note> => (), crm::Error,
    |this, Insert(note)| {
        this.world().notes.push(note);
        Ok(())
    }
);

handle!(
    Fake,
    Insert<crm::NewTask> => lead::TaskId, crm::Error,
    |this, Insert(task)| {
        let mut world = this.world();
        world.tasks.push(task);
        Ok(lead::TaskId::from(i64::try_from(world.tasks.len()).unwrap()))
    }
);

handle!(
    Fake,
    Select<By<Option<unit::Status>, unit::Id>> => Option<unit::Status>, inventory::Error,
    |this, Select(by)| {
        Ok(this.world().inventory.get(&by.into_inner()).map(|(s, _)| *s))
    }
);

handle!(
    Fake,
    Insert<inventory::Deal> => inventory::Booking, inventory::Error,
    |this, Insert(deal)| {
        let mut world = this.world();
        world.book_calls += 1;
        let Some(entry) = world.inventory.get_mut(&deal.unit_id) else {
            return Err(tracerr::new!(inventory::Error::Status(404)));
        };
        Ok(match *entry {
            (unit::Status::Free, _) => {
                *entry = (unit::Status::Booked, Some(deal.lead_id));
                inventory::Booking { booked: true, already_in_deal: false }
            }
            (unit::Status::Booked, Some(holder)) if holder == deal.lead_id => {
                inventory::Booking { booked: false, already_in_deal: true }
            }
            (unit::Status::Booked | unit::Status::Sold, _) => {
                inventory::Booking::default()
            }
        })
    }
);

handle!(
    Fake,
    Delete<By<inventory::Deal, lead::Id>> => inventory::Unbooking, inventory::Error,
    |this, Delete(by)| {
        let lead_id = by.into_inner();
        let mut world = this.world();
        world.unbook_calls += 1;
        let held = world
            .inventory
            .values_mut()
            .find(|(s, holder)| *s == unit::Status::Booked && *holder == Some(lead_id));
        Ok(inventory::Unbooking {
            success: held
                .map(|entry| *entry = (unit::Status::Free, None))
                .is_some(),
        })
    }
);

handle!(
    Fake,
    Update<catalog::StatusChange> => (), catalog::Error,
    |this, Update(change)| {
        drop(this.world().catalog.insert(change.unit, change.status));
        Ok(())
    }
);

handle!(
    Fake,
    Select<By<Option<catalog::Listing>, catalog::Lookup>> => Option<catalog::Listing>, catalog::Error,
    |this, Select(by)| {
        Ok(this.world().listings.get(&by.into_inner().id).cloned())
    }
);

handle!(
    Fake,
    Select<By<payment::OrderStatus, booking::PaymentOrderId>> => payment::OrderStatus, payment::Error,
    |this, Select(by)| {
        Ok(this
            .world()
            .orders
            .get(&by.into_inner())
            .copied()
            .unwrap_or(payment::OrderStatus::Created))
    }
);

handle!(
    Fake,
    Insert<notifier::Email> => (), notifier::Error,
    |this, Insert(email)| {
        this.world().emails.push(email);
        Ok(())
    }
);
