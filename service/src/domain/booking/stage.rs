//! [`Stage`] and [`Substage`] definitions.

use common::define_kind;

#[cfg(doc)]
use crate::domain::{Booking, Pipeline};

define_kind! {
    #[doc = "Coarse funnel stage of a [`Booking`]."]
    enum Stage {
        #[doc = "First contact with a client, before any reservation."]
        Started = 1,

        #[doc = "Unit is reserved for a client."]
        Booking = 2,

        #[doc = "Client is applying for a mortgage."]
        Mortgage = 3,

        #[doc = "Contract is being prepared, signed or registered."]
        Contract = 4,

        #[doc = "Money is being transferred."]
        Money = 5,

        #[doc = "Deal is closed successfully."]
        Realized = 6,

        #[doc = "Deal is lost."]
        Unrealized = 7,
    }
}

define_kind! {
    #[doc = "Pipeline-qualified interpretation of a CRM status of a [`Booking`]."]
    enum Substage {
        #[doc = "Status is not known to this service."]
        Unknown = 0,

        #[doc = "First contact."]
        Start = 1,

        #[doc = "Client is being assigned to an agent."]
        AssignAgent = 2,

        #[doc = "Appointment is being made."]
        MakeAppointment = 3,

        #[doc = "Meeting is appointed."]
        Meeting = 4,

        #[doc = "Meeting is in progress."]
        MeetingInProgress = 5,

        #[doc = "Client is making a decision."]
        MakeDecision = 6,

        #[doc = "Repeated meeting."]
        ReMeeting = 7,

        #[doc = "Unit is booked."]
        Booking = 8,

        #[doc = "Unit is booked and the booking is paid."]
        PaidBooking = 9,

        #[doc = "Mortgage lead is created."]
        MortgageLead = 10,

        #[doc = "Client applies for a mortgage."]
        ApplyForAMortgage = 11,

        #[doc = "Mortgage application is filed."]
        MortgageFiled = 12,

        #[doc = "Mortgage is approved."]
        MortgageDone = 13,

        #[doc = "Contract is being prepared."]
        DduProcess = 14,

        #[doc = "Contract is being confirmed."]
        Confirmation = 15,

        #[doc = "Contract is being signed."]
        DduSigning = 16,

        #[doc = "Contract is being registered."]
        DduRegister = 17,

        #[doc = "Money is being transferred."]
        MoneyProcess = 18,

        #[doc = "Deal is closed successfully."]
        Realized = 19,

        #[doc = "Deal is lost."]
        Unrealized = 20,

        #[doc = "Deal is terminated."]
        Termination = 21,

        #[doc = "Call center redials a client."]
        Redial = 22,

        #[doc = "Call center robot checks a client."]
        RobotCheck = 23,

        #[doc = "Call center tries to contact a client."]
        TryContact = 24,

        #[doc = "Call center quality control."]
        QualityControl = 25,

        #[doc = "Call center sells an appointment."]
        SellAppointment = 26,

        #[doc = "Call center gets a client to a meeting."]
        GetToMeeting = 27,

        #[doc = "Video call is appointed."]
        AppointedZoom = 28,

        #[doc = "Video call is in progress."]
        ZoomCall = 29,

        #[doc = "Call center appointment is made."]
        Appointment = 30,

        #[doc = "Client is transferred to a sales manager."]
        TransferManager = 31,
    }
}

impl Substage {
    /// Returns the coarse [`Stage`] this [`Substage`] belongs to.
    ///
    /// [`None`] is returned for [`Substage::Unknown`].
    #[must_use]
    pub const fn stage(self) -> Option<Stage> {
        Some(match self {
            Self::Unknown => return None,
            Self::Start
            | Self::AssignAgent
            | Self::MakeAppointment
            | Self::Meeting
            | Self::MeetingInProgress
            | Self::MakeDecision
            | Self::ReMeeting
            | Self::Redial
            | Self::RobotCheck
            | Self::TryContact
            | Self::QualityControl
            | Self::SellAppointment
            | Self::GetToMeeting
            | Self::AppointedZoom
            | Self::ZoomCall
            | Self::Appointment
            | Self::TransferManager => Stage::Started,
            Self::Booking | Self::PaidBooking => Stage::Booking,
            Self::MortgageLead
            | Self::ApplyForAMortgage
            | Self::MortgageFiled
            | Self::MortgageDone => Stage::Mortgage,
            Self::DduProcess
            | Self::Confirmation
            | Self::DduSigning
            | Self::DduRegister => Stage::Contract,
            Self::MoneyProcess => Stage::Money,
            Self::Realized => Stage::Realized,
            Self::Unrealized | Self::Termination => Stage::Unrealized,
        })
    }

    /// Indicates whether a [`Booking`] in this [`Substage`] keeps holding its
    /// unit.
    ///
    /// Unknown statuses are not reserving: a lead moved into a status this
    /// service doesn't know about is released until the mapping is updated.
    /// Closed deals are not reserving either, the unit is either sold or
    /// free once a deal is closed.
    #[must_use]
    pub const fn is_reserving(self) -> bool {
        !matches!(self, Self::Unknown) && !self.is_closed()
    }

    /// Indicates whether the deal in this [`Substage`] is closed.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Realized | Self::Unrealized | Self::Termination)
    }

    /// Indicates whether the unit of a [`Booking`] in this [`Substage`] is
    /// considered sold.
    #[must_use]
    pub const fn is_selling(self) -> bool {
        matches!(self, Self::MoneyProcess | Self::Realized)
    }
}
