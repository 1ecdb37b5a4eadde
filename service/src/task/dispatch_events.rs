//! [`DispatchEvents`] [`Task`].

use std::{convert::Infallible, fmt};

use common::operations::Start;
use tracing as log;

use crate::{event, Service};

use super::Task;

/// [`Task`] for delivering emitted [`event::Event`]s to
/// [`event::Subscriber`]s.
pub struct DispatchEvents {
    /// Queue of the emitted [`event::Event`]s.
    queue: event::Queue,

    /// [`event::Subscriber`]s to deliver [`event::Event`]s to.
    subscribers: Vec<Box<dyn event::Subscriber>>,
}

impl DispatchEvents {
    /// Creates a new [`DispatchEvents`] [`Task`] delivering from the provided
    /// queue.
    #[must_use]
    pub fn new(
        queue: event::Queue,
        subscribers: Vec<Box<dyn event::Subscriber>>,
    ) -> Self {
        Self { queue, subscribers }
    }
}

impl fmt::Debug for DispatchEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEvents")
            .field("subscribers", &self.subscribers)
            .finish_non_exhaustive()
    }
}

impl<Db, Ext> Task<Start<DispatchEvents>> for Service<Db, Ext> {
    type Ok = ();
    type Err = Infallible;

    async fn execute(
        &self,
        Start(task): Start<DispatchEvents>,
    ) -> Result<Self::Ok, Self::Err> {
        let DispatchEvents {
            mut queue,
            subscribers,
        } = task;

        while let Some(event) = queue.recv().await {
            for sub in &subscribers {
                if let Err(e) = sub.notify(&event).await {
                    log::error!(
                        booking_id = %event.booking_id(),
                        "`{sub:?}` failed to handle `{}` event: {e}",
                        event.name(),
                    );
                }
            }
        }
        log::info!("`task::DispatchEvents` stopped, all emitters are gone");
        Ok(())
    }
}

#[cfg(test)]
mod spec {
    use std::{
        cell::RefCell,
        error::Error,
        rc::Rc,
    };

    use common::operations::Start;
    use futures::future::{self, LocalBoxFuture};

    use crate::{
        domain::booking,
        event::{self, Event},
        infra::mock,
    };

    use super::{DispatchEvents, Task as _};

    #[derive(Debug, Default)]
    struct Recorder(Rc<RefCell<Vec<Event>>>);

    impl event::Subscriber for Recorder {
        fn notify<'a>(
            &'a self,
            event: &'a Event,
        ) -> LocalBoxFuture<'a, Result<(), Box<dyn Error>>> {
            self.0.borrow_mut().push(*event);
            Box::pin(future::ok(()))
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl event::Subscriber for Failing {
        fn notify<'a>(
            &'a self,
            _: &'a Event,
        ) -> LocalBoxFuture<'a, Result<(), Box<dyn Error>>> {
            Box::pin(future::err("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber_despite_failures() {
        let (svc, _) = mock::service();
        let (bus, queue) = event::Bus::new();
        let received = Rc::new(RefCell::new(vec![]));
        let booking_id = booking::Id::new();

        bus.emit(Event::BookingCreated { booking_id });
        bus.emit(Event::BookingPayed { booking_id });
        drop(bus);

        svc.execute(Start(DispatchEvents::new(
            queue,
            vec![
                Box::new(Failing),
                Box::new(Recorder(Rc::clone(&received))),
            ],
        )))
        .await
        .unwrap();

        assert_eq!(
            *received.borrow(),
            [
                Event::BookingCreated { booking_id },
                Event::BookingPayed { booking_id },
            ],
        );
    }
}
