//! [`Command`] for handling a payment gateway callback.

use common::{
    operations::{By, Commit, Insert, Lock, Select, Transact, Update},
    DateTime,
};
use derive_more::{Debug, Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        booking::{self, log::Actor, LogEntry, PaymentStatus, Substage},
        lead, Booking,
    },
    event::Event,
    infra::{
        crm, database, payment, Database, Integrations, Transactional,
    },
    Service,
};

use super::{log_partial_write, secrets_match, Command};

/// [`Command`] for confirming the reservation payment of a [`Booking`]
/// reported by the payment gateway.
#[derive(Clone, Debug)]
pub struct HandlePaymentCallback {
    /// Secret the callback carries.
    #[debug(skip)]
    pub secret: String,

    /// ID of the paid payment gateway order.
    pub order_id: booking::PaymentOrderId,
}

/// Outcome of a [`HandlePaymentCallback`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// [`Booking`] is marked as paid.
    Payed,

    /// [`Booking`] was already paid before.
    AlreadyPaid,

    /// Payment gateway doesn't confirm the payment.
    Unpaid(payment::OrderStatus),
}

impl<Db, Ext> Command<HandlePaymentCallback> for Service<Db, Ext>
where
    Db: Transactional,
    Ext: Integrations,
{
    type Ok = Outcome;
    type Err = Traced<ExecutionError>;

    #[expect(clippy::too_many_lines, reason = "sequential protocol")]
    async fn execute(
        &self,
        cmd: HandlePaymentCallback,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let HandlePaymentCallback { secret, order_id } = cmd;

        if !secrets_match(&secret, &self.config().payment_secret) {
            return Err(tracerr::new!(E::InvalidSecret));
        }

        let found = self
            .database()
            .execute(Select(By::<Option<Booking>, _>::new(order_id.clone())))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or_else(|| E::OrderNotExists(order_id.clone()))
            .map_err(tracerr::wrap!())?;
        if found.is_paid() {
            return Ok(Outcome::AlreadyPaid);
        }

        let status = self
            .external()
            .execute(Select(By::<payment::OrderStatus, _>::new(
                order_id.clone(),
            )))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if status != payment::OrderStatus::Succeeded {
            log::info!(
                booking_id = %found.id,
                "payment gateway order `{order_id}` is `{status}`",
            );
            return Ok(Outcome::Unpaid(status));
        }

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        tx.execute(Lock(By::<Booking, _>::new(found.id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let mut booking = tx
            .execute(Select(By::<Option<Booking>, _>::new(found.id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or_else(|| E::OrderNotExists(order_id.clone()))
            .map_err(tracerr::wrap!())?;
        if booking.is_paid() {
            return Ok(Outcome::AlreadyPaid);
        }
        if !booking.active {
            return Err(tracerr::new!(E::NotActive(booking.id)));
        }

        let until = (DateTime::now() + self.config().paid_booking_period)
            .coerce::<(Booking, booking::Reservation)>();
        let mut patch = booking::Patch {
            payment_status: Some(PaymentStatus::Payed),
            should_be_deactivated_by_timer: Some(false),
            until: Some(Some(until)),
            ..booking::Patch::new(booking.id)
        };

        let pipelines = &self.config().pipelines;
        let pipeline = Self::pipeline_of(&tx, &booking)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        let paid_status = pipeline.and_then(|p| {
            Some((
                pipelines.pipeline_id(p)?,
                pipelines.status_of(p, Substage::PaidBooking)?,
            ))
        });
        if let Some((_, status_id)) = paid_status {
            patch.status_id = Some(Some(status_id));
            patch = patch.with_substage(Substage::PaidBooking);
        }

        tx.execute(Update(patch.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        if let Some(lead_id) = booking.lead_id {
            let fields = &self.config().fields;
            let mut custom_fields = lead::CustomFields::default();
            custom_fields.insert(
                fields.booking_payment_status,
                vec![lead::FieldValue::text("Да")],
            );
            custom_fields.insert(
                fields.booking_until,
                vec![lead::FieldValue::text(until.to_dotted_day())],
            );
            self.external()
                .execute(Update(crm::LeadPatch {
                    id: lead_id,
                    pipeline_id: paid_status.map(|(p, _)| p),
                    status_id: paid_status.map(|(_, s)| s),
                    custom_fields,
                }))
                .await
                .inspect_err(|e| {
                    log_partial_write("crm", &booking, &["payment"], e);
                })
                .map_err(tracerr::map_from_and_wrap!(=> E))?;

            let note = crm::Note {
                lead_id,
                text: format!(
                    "Booking is paid via order {order_id}, unit is held \
                     until {}",
                    until.to_dotted_day(),
                ),
            };
            if let Err(e) = self.external().execute(Insert(note)).await {
                log::warn!("failed to add note to `Lead(id: {lead_id})`: {e}");
            }
        }

        tx.execute(Insert(LogEntry::new(
            booking.id,
            Actor::Payment,
            format!("Payment order {order_id} succeeded"),
        )))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> E))?;

        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        patch.apply(&mut booking);
        self.events().emit(Event::BookingPayed {
            booking_id: booking.id,
        });
        self.notify_agent(&booking, "booking_payed_agent_notification")
            .await;

        Ok(Outcome::Payed)
    }
}

/// Error of [`HandlePaymentCallback`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// CRM error.
    #[display("CRM operation failed: {_0}")]
    Crm(crm::Error),

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// Callback carries a wrong secret.
    #[display("Payment callback secret mismatch")]
    #[from(ignore)]
    InvalidSecret,

    /// [`Booking`] is not active.
    #[display("`Booking(id: {_0})` is not active")]
    #[from(ignore)]
    NotActive(#[error(not(source))] booking::Id),

    /// No [`Booking`] is paid by the provided order.
    #[display("No `Booking` is paid by `{_0}` order")]
    #[from(ignore)]
    OrderNotExists(#[error(not(source))] booking::PaymentOrderId),

    /// Payment gateway error.
    #[display("Payment gateway operation failed: {_0}")]
    Payment(payment::Error),
}

#[cfg(test)]
mod spec {
    use crate::{
        domain::{
            booking::{self, PaymentStatus, Substage},
            lead, unit,
        },
        event::Event,
        infra::{mock, payment},
        Command as _,
    };

    use super::{ExecutionError, HandlePaymentCallback, Outcome};

    fn seed(svc: &mock::MockService) -> (booking::Id, booking::PaymentOrderId) {
        let unit = mock::seed_unit(svc, unit::Id::from(100));
        let booking =
            mock::seed_active_booking(svc, &unit, lead::Id::from(5_i64));
        let order_id = booking::PaymentOrderId::new("order-1").unwrap();
        svc.database()
            .state()
            .bookings
            .get_mut(&booking.id)
            .unwrap()
            .payment_order_id = Some(order_id.clone());
        (booking.id, order_id)
    }

    fn callback(order_id: &booking::PaymentOrderId) -> HandlePaymentCallback {
        HandlePaymentCallback {
            secret: "payment-secret".into(),
            order_id: order_id.clone(),
        }
    }

    #[tokio::test]
    async fn marks_booking_paid_once() {
        let (svc, mut queue) = mock::service();
        let (booking_id, order_id) = seed(&svc);
        drop(
            svc.external()
                .world()
                .orders
                .insert(order_id.clone(), payment::OrderStatus::Succeeded),
        );

        let outcome = svc.execute(callback(&order_id)).await.unwrap();

        assert_eq!(outcome, Outcome::Payed);
        let stored = svc.database().booking(booking_id);
        assert_eq!(stored.payment_status, PaymentStatus::Payed);
        assert!(!stored.should_be_deactivated_by_timer);
        assert!(stored.until.is_some());
        assert_eq!(stored.substage, Some(Substage::PaidBooking));
        {
            let world = svc.external().world();
            assert_eq!(world.lead_updates.len(), 1);
            assert_eq!(
                world.lead_updates[0]
                    .custom_fields
                    .value(svc.config().fields.booking_payment_status),
                Some("Да"),
            );
            assert_eq!(world.notes.len(), 1);
            assert_eq!(world.emails.len(), 1);
        }
        assert_eq!(
            mock::events(&mut queue),
            [Event::BookingPayed { booking_id }],
        );

        let replay = svc.execute(callback(&order_id)).await.unwrap();
        assert_eq!(replay, Outcome::AlreadyPaid);
        assert_eq!(svc.external().world().lead_updates.len(), 1);
    }

    #[tokio::test]
    async fn keeps_unconfirmed_payment_unpaid() {
        let (svc, _) = mock::service();
        let (booking_id, order_id) = seed(&svc);

        let outcome = svc.execute(callback(&order_id)).await.unwrap();

        assert_eq!(outcome, Outcome::Unpaid(payment::OrderStatus::Created));
        let stored = svc.database().booking(booking_id);
        assert_eq!(stored.payment_status, PaymentStatus::Unpaid);
        assert!(stored.should_be_deactivated_by_timer);
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let (svc, _) = mock::service();
        let (booking_id, order_id) = seed(&svc);

        let err = svc
            .execute(HandlePaymentCallback {
                secret: "guess".into(),
                order_id,
            })
            .await
            .unwrap_err();

        assert!(matches!(err.as_ref(), ExecutionError::InvalidSecret));
        assert!(!svc.database().booking(booking_id).is_paid());
    }
}
