//! [`Pipeline`] definitions and the CRM status [`Mapping`].

use std::{collections::HashMap, sync::Arc};

use common::define_kind;
use derive_more::{Display, Error};
use serde::Deserialize;

use crate::domain::{booking::Substage, lead};

define_kind! {
    #[doc = "CRM workflow with its own disjoint set of statuses."]
    enum Pipeline {
        #[doc = "Shared call center pipeline."]
        CallCenter = 1,

        #[doc = "Tyumen sales pipeline."]
        Tyumen = 2,

        #[doc = "Moscow sales pipeline."]
        Moscow = 3,

        #[doc = "Saint Petersburg sales pipeline."]
        SaintPetersburg = 4,

        #[doc = "Yekaterinburg sales pipeline."]
        Yekaterinburg = 5,
    }
}

/// Versioned table of CRM pipelines and their statuses.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Table {
    /// Version label of this [`Table`].
    pub version: String,

    /// Statuses of every known [`Pipeline`].
    pub pipelines: Vec<Statuses>,

    /// System status of a successfully closed lead shared by all pipelines.
    pub realized: lead::StatusId,

    /// System status of a lost lead shared by all pipelines.
    pub unrealized: lead::StatusId,
}

/// Statuses of a single [`Pipeline`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Statuses {
    /// [`Pipeline`] these [`Statuses`] belong to.
    pub pipeline: Pipeline,

    /// ID of the [`Pipeline`] in the CRM.
    pub id: lead::PipelineId,

    /// Status IDs of every [`Substage`] available in the [`Pipeline`].
    pub statuses: Vec<(Substage, lead::StatusId)>,
}

/// Result of resolving a CRM status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Resolved {
    /// [`Pipeline`] the status belongs to, if known.
    pub pipeline: Option<Pipeline>,

    /// [`Substage`] of the status.
    pub substage: Substage,
}

/// Precomputed lookups between CRM statuses and [`Substage`]s.
#[derive(Clone, Debug)]
pub struct Mapping(Arc<Inner>);

/// Inner representation of a [`Mapping`].
#[derive(Debug)]
struct Inner {
    /// Version label of the [`Table`] this [`Mapping`] is built from.
    version: String,

    /// [`Pipeline`] and [`Substage`] by a status.
    by_status: HashMap<lead::StatusId, (Option<Pipeline>, Substage)>,

    /// [`Pipeline`] by its CRM ID.
    by_pipeline_id: HashMap<lead::PipelineId, Pipeline>,

    /// CRM ID of every [`Pipeline`].
    pipeline_ids: HashMap<Pipeline, lead::PipelineId>,

    /// Status by a [`Pipeline`] and a [`Substage`].
    statuses: HashMap<(Pipeline, Substage), lead::StatusId>,

    /// System status of a successfully closed lead.
    realized: lead::StatusId,

    /// System status of a lost lead.
    unrealized: lead::StatusId,
}

impl Mapping {
    /// Builds a new [`Mapping`] out of the provided [`Table`].
    ///
    /// # Errors
    ///
    /// If the same status is claimed twice, so pipelines are not disjoint.
    pub fn new(table: &Table) -> Result<Self, ConflictError> {
        let Table {
            version,
            pipelines,
            realized,
            unrealized,
        } = table;

        let mut by_status = HashMap::from([
            (*realized, (None, Substage::Realized)),
            (*unrealized, (None, Substage::Unrealized)),
        ]);
        if realized == unrealized {
            return Err(ConflictError { status: *realized });
        }

        let mut by_pipeline_id = HashMap::new();
        let mut pipeline_ids = HashMap::new();
        let mut statuses = HashMap::new();
        for p in pipelines {
            drop(by_pipeline_id.insert(p.id, p.pipeline));
            drop(pipeline_ids.insert(p.pipeline, p.id));
            for &(substage, status) in &p.statuses {
                if by_status
                    .insert(status, (Some(p.pipeline), substage))
                    .is_some()
                {
                    return Err(ConflictError { status });
                }
                drop(statuses.insert((p.pipeline, substage), status));
            }
        }

        Ok(Self(Arc::new(Inner {
            version: version.clone(),
            by_status,
            by_pipeline_id,
            pipeline_ids,
            statuses,
            realized: *realized,
            unrealized: *unrealized,
        })))
    }

    /// Returns the version label of this [`Mapping`].
    #[must_use]
    pub fn version(&self) -> &str {
        &self.0.version
    }

    /// Returns the [`Substage`] of the provided CRM status.
    ///
    /// [`Substage::Unknown`] is returned for unrecognized statuses.
    #[must_use]
    pub fn substage_of(&self, status: lead::StatusId) -> Substage {
        self.0
            .by_status
            .get(&status)
            .map_or(Substage::Unknown, |(_, s)| *s)
    }

    /// Returns the [`Pipeline`] the provided CRM status belongs to.
    ///
    /// [`None`] is returned for unrecognized and system statuses.
    #[must_use]
    pub fn pipeline_of(&self, status: lead::StatusId) -> Option<Pipeline> {
        self.0.by_status.get(&status).and_then(|(p, _)| *p)
    }

    /// Returns the [`Pipeline`] with the provided CRM ID, if it's a known
    /// sales pipeline.
    #[must_use]
    pub fn pipeline(&self, id: lead::PipelineId) -> Option<Pipeline> {
        self.0.by_pipeline_id.get(&id).copied()
    }

    /// Returns the CRM ID of the provided [`Pipeline`].
    #[must_use]
    pub fn pipeline_id(&self, pipeline: Pipeline) -> Option<lead::PipelineId> {
        self.0.pipeline_ids.get(&pipeline).copied()
    }

    /// Returns the CRM status of the provided [`Substage`] in the given
    /// [`Pipeline`].
    ///
    /// [`None`] is returned if the [`Pipeline`] has no such [`Substage`].
    #[must_use]
    pub fn status_of(
        &self,
        pipeline: Pipeline,
        substage: Substage,
    ) -> Option<lead::StatusId> {
        match substage {
            Substage::Realized => Some(self.0.realized),
            Substage::Unrealized => Some(self.0.unrealized),
            Substage::Unknown
            | Substage::Start
            | Substage::AssignAgent
            | Substage::MakeAppointment
            | Substage::Meeting
            | Substage::MeetingInProgress
            | Substage::MakeDecision
            | Substage::ReMeeting
            | Substage::Booking
            | Substage::PaidBooking
            | Substage::MortgageLead
            | Substage::ApplyForAMortgage
            | Substage::MortgageFiled
            | Substage::MortgageDone
            | Substage::DduProcess
            | Substage::Confirmation
            | Substage::DduSigning
            | Substage::DduRegister
            | Substage::MoneyProcess
            | Substage::Termination
            | Substage::Redial
            | Substage::RobotCheck
            | Substage::TryContact
            | Substage::QualityControl
            | Substage::SellAppointment
            | Substage::GetToMeeting
            | Substage::AppointedZoom
            | Substage::ZoomCall
            | Substage::Appointment
            | Substage::TransferManager => {
                self.0.statuses.get(&(pipeline, substage)).copied()
            }
        }
    }

    /// Resolves the CRM status of a lead in the provided CRM pipeline.
    ///
    /// The [`Pipeline`] is derived from the status membership first, falling
    /// back to the lead's pipeline for shared system statuses.
    #[must_use]
    pub fn resolve(
        &self,
        pipeline_id: lead::PipelineId,
        status: lead::StatusId,
    ) -> Resolved {
        Resolved {
            pipeline: self
                .pipeline_of(status)
                .or_else(|| self.pipeline(pipeline_id)),
            substage: self.substage_of(status),
        }
    }
}

/// Error of building a [`Mapping`] out of overlapping pipelines.
#[derive(Clone, Copy, Debug, Display, Error)]
#[display("CRM status `{status}` is claimed more than once")]
pub struct ConflictError {
    /// Status claimed more than once.
    #[error(not(source))]
    pub status: lead::StatusId,
}

impl Default for Table {
    #[expect(clippy::too_many_lines, reason = "plain data")]
    fn default() -> Self {
        use Substage as S;

        fn statuses(
            pipeline: Pipeline,
            id: i64,
            statuses: &[(Substage, i64)],
        ) -> Statuses {
            Statuses {
                pipeline,
                id: id.into(),
                statuses: statuses
                    .iter()
                    .map(|&(s, id)| (s, id.into()))
                    .collect(),
            }
        }

        Self {
            version: "2024.1".into(),
            realized: 142.into(),
            unrealized: 143.into(),
            pipelines: vec![
                statuses(
                    Pipeline::CallCenter,
                    3_934_218,
                    &[
                        (S::Start, 37_592_457),
                        (S::Redial, 39_338_919),
                        (S::RobotCheck, 39_339_075),
                        (S::TryContact, 37_592_460),
                        (S::QualityControl, 39_394_839),
                        (S::SellAppointment, 40_127_289),
                        (S::GetToMeeting, 39_394_842),
                        (S::MakeAppointment, 37_592_463),
                        (S::AppointedZoom, 40_127_292),
                        (S::ZoomCall, 40_127_295),
                        (S::MakeDecision, 40_127_307),
                        (S::Booking, 40_127_310),
                        (S::Appointment, 37_592_541),
                        (S::TransferManager, 37_592_544),
                    ],
                ),
                statuses(
                    Pipeline::Tyumen,
                    1_305_043,
                    &[
                        (S::Start, 21_189_703),
                        (S::AssignAgent, 51_489_690),
                        (S::MakeAppointment, 40_850_073),
                        (S::Meeting, 21_189_706),
                        (S::MeetingInProgress, 21_189_709),
                        (S::MakeDecision, 21_189_712),
                        (S::ReMeeting, 40_850_076),
                        (S::Booking, 21_197_641),
                        (S::PaidBooking, 40_850_079),
                        (S::ApplyForAMortgage, 40_850_085),
                        (S::MortgageFiled, 21_199_108),
                        (S::MortgageDone, 28_972_285),
                        (S::DduProcess, 21_197_560),
                        (S::DduSigning, 21_199_072),
                        (S::DduRegister, 21_197_563),
                        (S::MoneyProcess, 21_197_566),
                        (S::Termination, 34_654_647),
                    ],
                ),
                statuses(
                    Pipeline::Moscow,
                    1_941_865,
                    &[
                        (S::Start, 29_096_287),
                        (S::AssignAgent, 51_105_825),
                        (S::MakeAppointment, 29_096_290),
                        (S::Meeting, 45_598_248),
                        (S::MeetingInProgress, 45_598_251),
                        (S::MakeDecision, 29_096_398),
                        (S::ReMeeting, 45_598_254),
                        (S::Booking, 29_096_401),
                        (S::PaidBooking, 45_598_284),
                        (S::MortgageLead, 29_096_404),
                        (S::DduProcess, 29_096_407),
                        (S::Confirmation, 29_096_410),
                        (S::DduSigning, 29_096_413),
                        (S::DduRegister, 29_096_416),
                        (S::MoneyProcess, 29_096_419),
                    ],
                ),
                statuses(
                    Pipeline::SaintPetersburg,
                    3_568_449,
                    &[
                        (S::Start, 35_065_581),
                        (S::AssignAgent, 41_481_162),
                        (S::MakeAppointment, 41_182_440),
                        (S::Meeting, 36_204_951),
                        (S::MeetingInProgress, 41_182_452),
                        (S::MakeDecision, 36_204_954),
                        (S::ReMeeting, 41_182_443),
                        (S::Booking, 35_065_584),
                        (S::PaidBooking, 41_182_425),
                        (S::ApplyForAMortgage, 35_065_587),
                        (S::MortgageFiled, 41_182_434),
                        (S::MortgageDone, 41_182_437),
                        (S::DduProcess, 36_204_957),
                        (S::Confirmation, 36_204_960),
                        (S::DduSigning, 36_204_963),
                        (S::DduRegister, 36_204_966),
                        (S::MoneyProcess, 36_204_969),
                        (S::Termination, 41_182_407),
                    ],
                ),
                statuses(
                    Pipeline::Yekaterinburg,
                    5_798_376,
                    &[
                        (S::Start, 50_814_837),
                        (S::AssignAgent, 51_944_400),
                        (S::MakeAppointment, 50_814_840),
                        (S::Meeting, 50_814_930),
                        (S::MeetingInProgress, 50_814_843),
                        (S::MakeDecision, 50_814_933),
                        (S::ReMeeting, 50_814_936),
                        (S::Booking, 50_814_939),
                        (S::PaidBooking, 50_814_942),
                        (S::ApplyForAMortgage, 50_814_948),
                        (S::MortgageFiled, 50_814_951),
                        (S::MortgageDone, 50_814_954),
                        (S::DduProcess, 50_814_957),
                        (S::DduSigning, 50_814_960),
                        (S::DduRegister, 50_814_963),
                        (S::MoneyProcess, 50_814_966),
                        (S::Termination, 50_814_969),
                    ],
                ),
            ],
        }
    }
}

#[cfg(test)]
mod spec {
    use crate::domain::{booking::Substage, lead};

    use super::{Mapping, Pipeline, Resolved, Statuses, Table};

    #[test]
    fn deserializes_table() {
        let table: Table = serde_json::from_value(serde_json::json!({
            "version": "v2",
            "pipelines": [{
                "pipeline": "TYUMEN",
                "id": 7,
                "statuses": [["BOOKING", 70], ["MAKE_DECISION", 71]],
            }],
            "realized": 142,
            "unrealized": 143,
        }))
        .unwrap();

        assert_eq!(table.version, "v2");
        assert_eq!(table.pipelines[0].pipeline, Pipeline::Tyumen);
        assert_eq!(
            table.pipelines[0].statuses,
            [
                (Substage::Booking, lead::StatusId::from(70)),
                (Substage::MakeDecision, lead::StatusId::from(71)),
            ],
        );
        assert_eq!(table.unrealized, lead::StatusId::from(143));
    }

    #[test]
    fn resolves_every_known_status() {
        let table = Table::default();
        let mapping = Mapping::new(&table).unwrap();

        assert_eq!(table.pipelines.len(), 5);
        for Statuses {
            pipeline,
            id,
            statuses,
        } in &table.pipelines
        {
            assert_eq!(mapping.pipeline(*id), Some(*pipeline));
            assert_eq!(mapping.pipeline_id(*pipeline), Some(*id));
            for &(substage, status) in statuses {
                assert_eq!(mapping.substage_of(status), substage, "{status}");
                assert_eq!(mapping.pipeline_of(status), Some(*pipeline));
                assert_eq!(mapping.status_of(*pipeline, substage), Some(status));
            }
        }
    }

    #[test]
    fn resolves_concrete_statuses() {
        let mapping = Mapping::new(&Table::default()).unwrap();

        for (status, pipeline, substage) in [
            (21_197_641, Pipeline::Tyumen, Substage::Booking),
            (45_598_284, Pipeline::Moscow, Substage::PaidBooking),
            (41_182_407, Pipeline::SaintPetersburg, Substage::Termination),
            (50_814_966, Pipeline::Yekaterinburg, Substage::MoneyProcess),
            (39_338_919, Pipeline::CallCenter, Substage::Redial),
        ] {
            let status = lead::StatusId::from(status);
            assert_eq!(mapping.substage_of(status), substage);
            assert_eq!(mapping.pipeline_of(status), Some(pipeline));
        }
    }

    #[test]
    fn unknown_status_does_not_fail() {
        let mapping = Mapping::new(&Table::default()).unwrap();
        let status = lead::StatusId::from(1);

        assert_eq!(mapping.substage_of(status), Substage::Unknown);
        assert_eq!(mapping.pipeline_of(status), None);
        assert_eq!(
            mapping.resolve(lead::PipelineId::from(1), status),
            Resolved {
                pipeline: None,
                substage: Substage::Unknown,
            },
        );
    }

    #[test]
    fn system_statuses_take_lead_pipeline() {
        let mapping = Mapping::new(&Table::default()).unwrap();

        assert_eq!(
            mapping.resolve(
                lead::PipelineId::from(1_941_865),
                lead::StatusId::from(143),
            ),
            Resolved {
                pipeline: Some(Pipeline::Moscow),
                substage: Substage::Unrealized,
            },
        );
        assert_eq!(
            mapping.status_of(Pipeline::Tyumen, Substage::Realized),
            Some(lead::StatusId::from(142)),
        );
        assert_eq!(
            mapping.status_of(Pipeline::Moscow, Substage::Termination),
            None,
        );
    }

    #[test]
    fn rejects_overlapping_pipelines() {
        let mut table = Table::default();
        let stolen = table.pipelines[1].statuses[0];
        table.pipelines[2].statuses.push(stolen);

        let err = Mapping::new(&table).unwrap_err();

        assert_eq!(err.status, stolen.1);
    }
}
