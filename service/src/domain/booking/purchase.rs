//! Online [`Purchase`] definitions.

use common::{define_kind, DateTimeOf};

#[cfg(doc)]
use crate::domain::Booking;

/// Progress of the online purchase flow of a [`Booking`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Purchase {
    /// Status of the online purchase reported to the CRM.
    pub status: Option<Status>,

    /// Indicator whether the client started the online purchase.
    pub started: bool,

    /// [`PaymentMethod`] selected by the client, if any.
    pub payment_method: Option<PaymentMethod>,

    /// Indicator whether the CRM validated the agent data.
    pub agent_data_validated: bool,

    /// Indicator whether the contract draft is created.
    pub ddu_created: bool,

    /// Indicator whether a lawyer uploaded the contract into the CRM.
    pub ddu_uploaded_by_lawyer: bool,

    /// Indicator whether the client accepted the contract.
    pub ddu_accepted: bool,

    /// Indicator whether the escrow document is uploaded.
    pub escrow_uploaded: bool,

    /// Contract signing day set in the CRM, if any.
    pub signing_date: Option<SigningDateTime>,

    /// Indicator whether the contract is signed according to the CRM.
    pub signed: bool,
}

impl Purchase {
    /// Returns the current [`Step`] of this [`Purchase`].
    ///
    /// [`None`] is returned until the booking is paid, since the online
    /// purchase is not available before.
    #[must_use]
    pub fn step(&self, paid: bool) -> Option<Step> {
        if !paid {
            return None;
        }

        Some(if self.signed {
            Step::Finished
        } else if self.signing_date.is_some() && self.escrow_uploaded {
            Step::AmocrmSigning
        } else if self.escrow_uploaded {
            Step::AmocrmSigningDate
        } else if self.ddu_accepted {
            Step::EscrowUpload
        } else if self.ddu_uploaded_by_lawyer {
            Step::DduAccept
        } else if self.ddu_created {
            Step::AmocrmDduUploadingByLawyer
        } else if self.agent_data_validated
            || self
                .payment_method
                .is_some_and(PaymentMethod::skips_agent_validation)
        {
            Step::DduCreate
        } else if self.payment_method.is_some() {
            Step::AmocrmAgentDataValidation
        } else if self.started {
            Step::PaymentMethodSelect
        } else {
            Step::OnlinePurchaseStart
        })
    }
}

define_kind! {
    #[doc = "Step of the online [`Purchase`] flow."]
    enum Step {
        #[doc = "Client is about to start the online purchase."]
        OnlinePurchaseStart = 1,

        #[doc = "Client selects a payment method."]
        PaymentMethodSelect = 2,

        #[doc = "CRM validates the agent data."]
        AmocrmAgentDataValidation = 3,

        #[doc = "Contract draft is being created."]
        DduCreate = 4,

        #[doc = "Lawyer uploads the contract into the CRM."]
        AmocrmDduUploadingByLawyer = 5,

        #[doc = "Client accepts the contract."]
        DduAccept = 6,

        #[doc = "Client uploads the escrow document."]
        EscrowUpload = 7,

        #[doc = "CRM sets the contract signing day."]
        AmocrmSigningDate = 8,

        #[doc = "Contract is being signed."]
        AmocrmSigning = 9,

        #[doc = "Online purchase is finished."]
        Finished = 10,
    }
}

define_kind! {
    #[doc = "Method the client pays a unit with."]
    enum PaymentMethod {
        #[doc = "Cash payment."]
        Cash = 1,

        #[doc = "Mortgage."]
        Mortgage = 2,

        #[doc = "Installment plan."]
        InstallmentPlan = 3,
    }
}

impl PaymentMethod {
    /// Indicates whether the agent data validation step is skipped for this
    /// [`PaymentMethod`].
    #[must_use]
    pub const fn skips_agent_validation(self) -> bool {
        matches!(self, Self::Cash | Self::InstallmentPlan)
    }
}

define_kind! {
    #[doc = "Online purchase status reported to the CRM."]
    enum Status {
        #[doc = "Online purchase is started."]
        Started = 1,

        #[doc = "Documents are sent for a check."]
        DocsSent = 2,

        #[doc = "Contract is accepted by the client."]
        DduAccepted = 3,

        #[doc = "Contract is registered."]
        DduRegistered = 4,
    }
}

/// Day when the contract is going to be signed.
pub type SigningDateTime = DateTimeOf<(Purchase, Signing)>;

/// Marker type describing a contract signing.
#[derive(Clone, Copy, Debug)]
pub struct Signing;

#[cfg(test)]
mod spec {
    use common::DateTime;

    use super::{PaymentMethod, Purchase, Step};

    #[test]
    fn no_step_until_paid() {
        assert_eq!(Purchase::default().step(false), None);
        assert_eq!(
            Purchase::default().step(true),
            Some(Step::OnlinePurchaseStart),
        );
    }

    #[test]
    fn walks_through_steps() {
        let mut purchase = Purchase {
            started: true,
            ..Purchase::default()
        };
        assert_eq!(purchase.step(true), Some(Step::PaymentMethodSelect));

        purchase.payment_method = Some(PaymentMethod::Mortgage);
        assert_eq!(purchase.step(true), Some(Step::AmocrmAgentDataValidation));

        purchase.agent_data_validated = true;
        assert_eq!(purchase.step(true), Some(Step::DduCreate));

        purchase.ddu_created = true;
        assert_eq!(purchase.step(true), Some(Step::AmocrmDduUploadingByLawyer));

        purchase.ddu_uploaded_by_lawyer = true;
        assert_eq!(purchase.step(true), Some(Step::DduAccept));

        purchase.ddu_accepted = true;
        assert_eq!(purchase.step(true), Some(Step::EscrowUpload));

        purchase.escrow_uploaded = true;
        assert_eq!(purchase.step(true), Some(Step::AmocrmSigningDate));

        purchase.signing_date = Some(DateTime::now().coerce());
        assert_eq!(purchase.step(true), Some(Step::AmocrmSigning));

        purchase.signed = true;
        assert_eq!(purchase.step(true), Some(Step::Finished));
    }

    #[test]
    fn cash_skips_agent_validation() {
        let purchase = Purchase {
            started: true,
            payment_method: Some(PaymentMethod::Cash),
            ..Purchase::default()
        };
        assert_eq!(purchase.step(true), Some(Step::DduCreate));
    }
}
