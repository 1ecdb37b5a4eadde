//! [`External`] systems bundle.

use common::{
    operations::{By, Delete, Insert, Select, Update},
    Handler,
};

use crate::domain::{booking, lead, unit};

use super::{
    catalog::{self, Graphql},
    crm::{self, Amocrm},
    inventory::{self, Profitbase},
    notifier::{self, Mailer},
    payment::{self, Sberbank},
};

/// Bundle of the external systems a [`Service`] talks to.
///
/// [`Service`]: crate::Service
#[derive(Clone, Debug)]
pub struct External {
    /// CRM client.
    pub crm: Amocrm,

    /// Inventory client.
    pub inventory: Profitbase,

    /// Property catalog client.
    pub catalog: Graphql,

    /// Payment gateway client.
    pub payment: Sberbank,

    /// Mail service client.
    pub notifier: Mailer,
}

/// Implements [`Handler`] for [`External`] by delegating to its field.
macro_rules! delegate {
    ($($field:ident: $client:ty => $args:ty;)*) => {$(
        impl Handler<$args> for External {
            type Ok = <$client as Handler<$args>>::Ok;
            type Err = <$client as Handler<$args>>::Err;

            async fn execute(
                &self,
                args: $args,
            ) -> Result<Self::Ok, Self::Err> {
                self.$field.execute(args).await
            }
        }
    )*};
}

delegate! {
    crm: Amocrm => Select<By<Option<lead::Lead>, lead::Id>>;
    crm: Amocrm => Select<By<Vec<lead::Lead>, Vec<lead::Id>>>;
    crm: Amocrm => Insert<crm::NewLead>;
    crm: Amocrm => Update<crm::LeadPatch>;
    crm: Amocrm => Insert<crm::Note>;
    crm: Amocrm => Insert<crm::NewTask>;
    crm: Amocrm => Update<crm::TaskCompletion>;
    inventory: Profitbase => Select<By<Option<unit::Status>, unit::Id>>;
    inventory: Profitbase => Insert<inventory::Deal>;
    inventory: Profitbase => Delete<By<inventory::Deal, lead::Id>>;
    catalog: Graphql => Update<catalog::StatusChange>;
    catalog: Graphql => Select<By<Option<catalog::Listing>, catalog::Lookup>>;
    payment: Sberbank
        => Select<By<payment::OrderStatus, booking::PaymentOrderId>>;
    notifier: Mailer => Insert<notifier::Email>;
}
