use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use super::{Dimm, InterleavableDimmSetBuilder, ReserveDimmSelector, ReserveError};
use crate::{PlannerError, BYTES_PER_GIB};

/// A request to lay out capacity across a set of Dimms.
#[derive(Clone, Debug, Default)]
pub struct MemoryAllocationRequest {
    /// Candidate Dimms.
    pub dimms: Vec<Dimm>,

    /// Whether one Dimm should be set aside as the reserve device.
    pub reserve_dimm: bool,
}

/// Configuration goal for a single Dimm.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DimmGoal {
    /// Capacity to allocate to memory mode, in GiB.
    pub memory_size: u64,

    /// Number of App Direct regions the Dimm participates in.
    pub app_direct_count: u8,
}

/// The layout assembled so far by a [`LayoutPipeline`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MemoryAllocationLayout {
    /// Goals, keyed by Dimm uid.
    pub goals: BTreeMap<String, DimmGoal>,

    /// Capacity left for storage, in GiB.
    pub storage_capacity: u64,

    /// Uid of the reserve Dimm, if one was chosen.
    pub reserved_dimm_uid: Option<String>,
}

impl MemoryAllocationLayout {
    /// Returns `true` if the given Dimm has been set aside as the reserve device.
    pub fn is_reserved(&self, uid: &str) -> bool {
        self.reserved_dimm_uid.as_deref() == Some(uid)
    }

    /// Returns the candidate Dimms from `request` that have not been set aside as the reserve device.
    pub fn unreserved_dimms<'a>(
        &'a self, request: &'a MemoryAllocationRequest,
    ) -> impl Iterator<Item = &'a Dimm> + 'a {
        request.dimms.iter().filter(move |dimm| !self.is_reserved(&dimm.uid))
    }
}

/// A single step in laying out capacity.
///
/// Steps refine the layout left behind by the steps that ran before them. They only ever modify the layout, never the
/// request, and running a step twice against the same request must produce the same layout. Steps that assign capacity
/// must skip the reserve Dimm.
pub trait LayoutStep {
    /// Applies this step to `layout`.
    ///
    /// # Errors
    ///
    /// If the step cannot be applied to the request, an error is returned and the layout should be discarded.
    fn execute(
        &self, request: &MemoryAllocationRequest, layout: &mut MemoryAllocationLayout,
    ) -> Result<(), PlannerError>;
}

/// An ordered list of layout steps.
#[derive(Default)]
pub struct LayoutPipeline {
    steps: Vec<Box<dyn LayoutStep + Send + Sync>>,
}

impl LayoutPipeline {
    /// Creates an empty `LayoutPipeline`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the standard pipeline, which only lays out the reserve Dimm.
    pub fn standard(builder: InterleavableDimmSetBuilder) -> Self {
        Self::new().with_step(ReserveDimmStep::with_dimm_set_builder(builder))
    }

    /// Appends a step to the pipeline.
    pub fn with_step<S>(mut self, step: S) -> Self
    where
        S: LayoutStep + Send + Sync + 'static,
    {
        self.steps.push(Box::new(step));
        self
    }

    /// Runs every step, in order, against an empty layout.
    ///
    /// # Errors
    ///
    /// If any step fails, its error is returned and no further steps are run. If the finished layout assigns more
    /// memory to a Dimm than the Dimm holds, `BadSize` is returned.
    pub fn run(&self, request: &MemoryAllocationRequest) -> Result<MemoryAllocationLayout, PlannerError> {
        let mut layout = MemoryAllocationLayout::default();
        for step in &self.steps {
            step.execute(request, &mut layout)?;
        }

        for dimm in &request.dimms {
            let Some(goal) = layout.goals.get(&dimm.uid) else {
                continue;
            };

            if goal.memory_size.saturating_mul(BYTES_PER_GIB) > dimm.capacity {
                return Err(PlannerError::BadSize {
                    reason: format!(
                        "goal of {} GiB for Dimm {} exceeds its capacity of {}",
                        goal.memory_size,
                        dimm.uid,
                        dimm.byte_size()
                    ),
                });
            }
        }

        Ok(layout)
    }
}

/// Sets aside one Dimm as the reserve device.
///
/// The reserve Dimm contributes nothing to memory mode or App Direct. Its whole capacity, rounded down to the nearest
/// GiB, is counted as storage capacity instead.
#[derive(Default)]
pub struct ReserveDimmStep {
    builder: InterleavableDimmSetBuilder,
}

impl ReserveDimmStep {
    /// Creates a new `ReserveDimmStep` that selects the reserve Dimm using the given Dimm set builder.
    pub fn with_dimm_set_builder(builder: InterleavableDimmSetBuilder) -> Self {
        Self { builder }
    }
}

impl LayoutStep for ReserveDimmStep {
    fn execute(
        &self, request: &MemoryAllocationRequest, layout: &mut MemoryAllocationLayout,
    ) -> Result<(), PlannerError> {
        if !request.reserve_dimm {
            return Ok(());
        }

        let reserved = ReserveDimmSelector::new(&request.dimms)
            .with_dimm_set_builder(self.builder.clone())
            .reserved_dimm()
            .map_err(|e| match e {
                ReserveError::NoDimms => PlannerError::BadRequestNoDimms,
            })?;

        let storage_gib = reserved.capacity / BYTES_PER_GIB;
        layout.storage_capacity += storage_gib;
        layout.goals.insert(reserved.uid.clone(), DimmGoal::default());
        layout.reserved_dimm_uid = Some(reserved.uid.clone());

        info!(dimm_uid = %reserved.uid, storage_gib, "Reserved Dimm for storage.");
        debug!(storage_capacity = layout.storage_capacity, "Updated storage capacity.");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::dimm_with_capacity;

    fn request(dimms: Vec<Dimm>, reserve_dimm: bool) -> MemoryAllocationRequest {
        MemoryAllocationRequest { dimms, reserve_dimm }
    }

    #[test]
    fn reserve_accounting_rounds_down_to_gib() {
        let dimms = vec![dimm_with_capacity("only", 0, 1_100_000_000_000)];
        let request = request(dimms, true);

        let mut layout = MemoryAllocationLayout {
            storage_capacity: 10,
            ..Default::default()
        };
        layout.goals.insert(
            "only".to_string(),
            DimmGoal {
                memory_size: 64,
                app_direct_count: 1,
            },
        );

        ReserveDimmStep::default().execute(&request, &mut layout).unwrap();

        assert_eq!(layout.storage_capacity, 10 + 1024);
        assert_eq!(layout.goals["only"], DimmGoal::default());
        assert_eq!(layout.reserved_dimm_uid.as_deref(), Some("only"));
    }

    #[test]
    fn no_reservation_requested_is_noop() {
        let request = request(vec![dimm_with_capacity("a", 0, BYTES_PER_GIB)], false);

        let mut layout = MemoryAllocationLayout::default();
        ReserveDimmStep::default().execute(&request, &mut layout).unwrap();

        assert_eq!(layout, MemoryAllocationLayout::default());
    }

    #[test]
    fn reservation_without_dimms_is_bad_request() {
        let request = request(Vec::new(), true);

        let mut layout = MemoryAllocationLayout::default();
        let result = ReserveDimmStep::default().execute(&request, &mut layout);

        assert_eq!(result, Err(PlannerError::BadRequestNoDimms));
        assert_eq!(layout, MemoryAllocationLayout::default());
    }

    struct FillMemoryStep {
        gib_per_dimm: u64,
    }

    impl LayoutStep for FillMemoryStep {
        fn execute(
            &self, request: &MemoryAllocationRequest, layout: &mut MemoryAllocationLayout,
        ) -> Result<(), PlannerError> {
            let uids = layout
                .unreserved_dimms(request)
                .map(|dimm| dimm.uid.clone())
                .collect::<Vec<_>>();
            for uid in uids {
                layout.goals.entry(uid).or_default().memory_size = self.gib_per_dimm;
            }
            Ok(())
        }
    }

    #[test]
    fn later_steps_skip_reserved_dimm() {
        let request = request(
            vec![
                dimm_with_capacity("a", 0, 128 * BYTES_PER_GIB),
                dimm_with_capacity("b", 1, 128 * BYTES_PER_GIB),
            ],
            true,
        );

        let pipeline = LayoutPipeline::standard(InterleavableDimmSetBuilder::new())
            .with_step(FillMemoryStep { gib_per_dimm: 16 });
        let layout = pipeline.run(&request).unwrap();

        let reserved = layout.reserved_dimm_uid.clone().unwrap();
        assert_eq!(layout.goals[&reserved], DimmGoal::default());
        assert_eq!(layout.storage_capacity, 128);
        assert_eq!(layout.goals.values().filter(|goal| goal.memory_size == 16).count(), 1);
    }

    #[test]
    fn pipeline_rejects_goal_beyond_capacity() {
        let request = request(vec![dimm_with_capacity("a", 0, 8 * BYTES_PER_GIB)], false);

        let pipeline = LayoutPipeline::new().with_step(FillMemoryStep { gib_per_dimm: 16 });
        let result = pipeline.run(&request);

        assert!(matches!(result, Err(PlannerError::BadSize { .. })));
    }

    #[test]
    fn pipeline_is_idempotent() {
        let request = request(
            (0..4)
                .map(|ch| dimm_with_capacity(&format!("d{}", ch), ch, 256 * BYTES_PER_GIB))
                .collect(),
            true,
        );

        let pipeline = LayoutPipeline::standard(InterleavableDimmSetBuilder::new());
        assert_eq!(pipeline.run(&request).unwrap(), pipeline.run(&request).unwrap());
    }
}
