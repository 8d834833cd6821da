use std::sync::Arc;

use bytesize::ByteSize;
use pmem_error::{generic_error, ErrorContext as _, GenericError};
use pmem_planner::{
    memory_allocator::{LayoutPipeline, MemoryAllocationRequest},
    namespace::{Inventory, NamespaceCreateSettings, SimulatedDriver},
    InterleaveFormat, NamespaceManager, PlannerConfiguration,
};
use serde::Serialize;
use tracing::info;

use crate::cli::Command;

#[derive(Serialize)]
struct DimmSetReport {
    socket: u16,
    dimms: Vec<String>,
    total_capacity: ByteSize,
}

#[derive(Serialize)]
struct RangesReport {
    pool: String,
    smallest: ByteSize,
    largest: ByteSize,
    increment: ByteSize,
}

#[derive(Serialize)]
struct DeleteReport {
    deleted: String,
    remaining_namespaces: usize,
}

/// Executes planner commands against an inventory snapshot.
pub struct Planner {
    config: PlannerConfiguration,
    driver: Arc<SimulatedDriver>,
    manager: NamespaceManager,
}

impl Planner {
    pub fn new(config: PlannerConfiguration, inventory: Inventory) -> Self {
        let driver = Arc::new(SimulatedDriver::new(inventory));
        let manager = NamespaceManager::from_configuration(&config, driver.clone());

        Self {
            config,
            driver,
            manager,
        }
    }

    /// Executes the given command, returning a YAML report of the outcome.
    pub fn execute(&self, command: &Command) -> Result<String, GenericError> {
        match command {
            Command::DimmSet { socket } => self.dimm_set(*socket),
            Command::Layout { reserve_dimm } => self.layout(*reserve_dimm),
            Command::Ranges { pool, ways } => self.ranges(pool, *ways),
            Command::Create {
                pool,
                capacity,
                name,
                format,
                adjust,
            } => self.create(pool, *capacity, name.clone(), format.to_format(), *adjust),
            Command::Resize {
                namespace,
                capacity,
                adjust,
            } => self.resize(namespace, *capacity, *adjust),
            Command::Delete { namespace } => self.delete(namespace),
        }
    }

    fn dimm_set(&self, socket: u16) -> Result<String, GenericError> {
        let dimms = self
            .driver
            .inventory()
            .dimms()
            .into_iter()
            .filter(|dimm| dimm.socket_id == socket)
            .collect();

        let mut builder = self.config.dimm_set_builder();
        builder.set_dimms(dimms);
        let set = builder
            .largest_set_of_interleavable_dimms()
            .with_error_context(|| format!("Failed to find interleavable Dimms on socket {}.", socket))?;

        render(&DimmSetReport {
            socket,
            total_capacity: ByteSize::b(set.iter().map(|dimm| dimm.capacity).sum()),
            dimms: set.into_iter().map(|dimm| dimm.uid).collect(),
        })
    }

    fn layout(&self, reserve_dimm: bool) -> Result<String, GenericError> {
        let request = MemoryAllocationRequest {
            dimms: self.driver.inventory().dimms(),
            reserve_dimm,
        };

        let layout = LayoutPipeline::standard(self.config.dimm_set_builder())
            .run(&request)
            .error_context("Failed to lay out memory allocation goals.")?;
        render(&layout)
    }

    fn ranges(&self, pool: &str, ways: Option<u8>) -> Result<String, GenericError> {
        let format = ways.map(|ways| InterleaveFormat {
            ways,
            ..Default::default()
        });
        let ranges = self
            .manager
            .available_persistent_size_range(pool, format.as_ref())
            .with_error_context(|| format!("Failed to calculate size ranges for pool '{}'.", pool))?;

        render(&RangesReport {
            pool: pool.to_string(),
            smallest: ByteSize::b(ranges.smallest),
            largest: ByteSize::b(ranges.largest),
            increment: ByteSize::b(ranges.increment),
        })
    }

    fn create(
        &self, pool: &str, capacity: ByteSize, name: Option<String>, format: Option<InterleaveFormat>, adjust: bool,
    ) -> Result<String, GenericError> {
        let settings = NamespaceCreateSettings {
            friendly_name: name,
            ..NamespaceCreateSettings::app_direct(capacity.as_u64())
        };

        let uid = self
            .manager
            .create_namespace(pool, &settings, format.as_ref(), adjust)
            .with_error_context(|| format!("Failed to create a {} namespace on pool '{}'.", capacity, pool))?;
        info!(%uid, "Namespace created.");

        render(&self.manager.namespace_details(&uid)?)
    }

    fn resize(&self, namespace: &str, capacity: ByteSize, adjust: bool) -> Result<String, GenericError> {
        let details = self.manager.namespace_details(namespace)?;
        let block_size = u64::from(details.record.block_size);
        if block_size == 0 {
            return Err(generic_error!("Namespace '{}' reports a block size of zero.", namespace));
        }

        let block_count = self
            .manager
            .resize_namespace(namespace, capacity.as_u64() / block_size, adjust)
            .with_error_context(|| format!("Failed to resize namespace '{}' to {}.", namespace, capacity))?;
        info!(namespace, block_count, "Namespace resized.");

        render(&self.manager.namespace_details(namespace)?)
    }

    fn delete(&self, namespace: &str) -> Result<String, GenericError> {
        self.manager
            .delete_namespace(namespace)
            .with_error_context(|| format!("Failed to delete namespace '{}'.", namespace))?;

        render(&DeleteReport {
            deleted: namespace.to_string(),
            remaining_namespaces: self.manager.namespace_count()?,
        })
    }
}

fn render<T: Serialize>(value: &T) -> Result<String, GenericError> {
    serde_yaml::to_string(value).error_context("Failed to render report.")
}
