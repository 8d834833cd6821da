use std::sync::Arc;

use tracing::{debug, error, info};

use super::{
    pool_supported_size_ranges,
    sizing::{adjust_block_count_if_allowed, is_aligned, minimum_namespace_size},
    CreationId, EnableState, EventCode, EventLog, Feature, FeatureLicensing, InMemoryNamespaceCache,
    InterleaveSetSelector, ManagementEvent, NamespaceCache, NamespaceCreateRequest, NamespaceCreateSettings,
    NamespaceDetails, NamespaceDiscovery, NamespaceDriver, NamespaceRecord, NamespaceType, Placement,
    PossibleNamespaceRanges, TracingEventLog,
};
use crate::{InterleaveFormat, InterleaveSet, PlannerConfiguration, PlannerError, Pool, BYTES_PER_GIB};

const DEFAULT_NAME_PREFIX: &str = "NvDimmVol";

/// Drives namespaces through their lifecycle.
///
/// Every operation checks, in order, that the caller has permission to manage namespaces, that a driver is available,
/// and that the operation is licensed, before validating its arguments against the current inventory. Changes are only
/// requested from the driver once every validation has passed. After the driver reports success, the namespace cache
/// is invalidated and a management event is logged. Nothing is invalidated or logged when the driver fails.
pub struct NamespaceManager {
    driver: Arc<dyn NamespaceDriver>,
    licensing: Arc<dyn FeatureLicensing>,
    cache: Arc<dyn NamespaceCache>,
    events: Arc<dyn EventLog>,
    default_name_prefix: String,
}

impl NamespaceManager {
    /// Creates a new `NamespaceManager` over the given collaborators.
    pub fn new(
        driver: Arc<dyn NamespaceDriver>, licensing: Arc<dyn FeatureLicensing>, cache: Arc<dyn NamespaceCache>,
        events: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            driver,
            licensing,
            cache,
            events,
            default_name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }

    /// Creates a new `NamespaceManager` from configuration.
    ///
    /// Licensing follows the configured list of unlicensed features. Namespaces are cached in memory, and management
    /// events are emitted as tracing records.
    pub fn from_configuration(config: &PlannerConfiguration, driver: Arc<dyn NamespaceDriver>) -> Self {
        Self::new(
            driver,
            Arc::new(config.licensing()),
            Arc::new(InMemoryNamespaceCache::new()),
            Arc::new(TracingEventLog),
        )
        .with_default_name_prefix(config.default_namespace_name_prefix.clone())
    }

    /// Sets the prefix used when synthesizing a friendly name for a namespace created without one.
    pub fn with_default_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.default_name_prefix = prefix.into();
        self
    }

    /// Returns the number of namespaces.
    ///
    /// # Errors
    ///
    /// See [`namespaces`](Self::namespaces).
    pub fn namespace_count(&self) -> Result<usize, PlannerError> {
        self.namespaces().map(|namespaces| namespaces.len())
    }

    /// Returns the uid and friendly name of every namespace.
    ///
    /// The list is served from the cache when present, and fetched from the driver and cached otherwise.
    ///
    /// # Errors
    ///
    /// If the caller lacks permissions, no driver is available, or the feature is not licensed, an error is returned.
    /// Errors from the driver are passed through.
    pub fn namespaces(&self) -> Result<Vec<NamespaceDiscovery>, PlannerError> {
        self.check_access(Feature::GetNamespaces)?;

        if let Some(namespaces) = self.cache.namespaces() {
            return Ok(namespaces);
        }

        let namespaces: Vec<_> = self.driver.namespaces()?.iter().map(NamespaceRecord::discovery).collect();
        self.cache.set_namespaces(namespaces.clone());
        Ok(namespaces)
    }

    /// Returns the details of a namespace.
    ///
    /// # Errors
    ///
    /// If the caller lacks permissions, no driver is available, or the feature is not licensed, an error is returned.
    /// If the namespace refers to an interleave set that its pool does not contain, `DriverFailed` is returned.
    pub fn namespace_details(&self, uid: &str) -> Result<NamespaceDetails, PlannerError> {
        self.check_access(Feature::GetNamespaceDetails)?;
        if uid.is_empty() {
            return Err(PlannerError::InvalidParameter {
                reason: "namespace uid is empty",
            });
        }

        if let Some(details) = self.cache.namespace_details(uid) {
            return Ok(details);
        }

        let record = self.driver.namespace(uid)?;
        let pool = self.driver.pool(&record.pool_uid)?;
        let devices = self.driver.devices()?;
        let details = NamespaceDetails::resolve(record, &pool, &devices)?;

        self.cache.set_namespace_details(details.clone());
        Ok(details)
    }

    /// Returns the number of namespaces backed, at least in part, by the given Dimm.
    ///
    /// # Errors
    ///
    /// If the caller lacks permissions, no driver is available, or the feature is not licensed, an error is returned.
    /// If the Dimm is unknown, `NotFound` is returned.
    pub fn device_namespace_count(&self, device_uid: &str) -> Result<usize, PlannerError> {
        self.check_access(Feature::GetNamespaces)?;

        let devices = self.driver.devices()?;
        let device = devices
            .iter()
            .find(|device| device.uid == device_uid)
            .ok_or_else(|| PlannerError::NotFound {
                what: "device",
                uid: device_uid.to_string(),
            })?;

        let pools = self.driver.pools()?;
        let backed_by_device = |namespace: &NamespaceRecord| match namespace.creation_id {
            CreationId::InterleaveSet(set_id) => pools
                .iter()
                .filter(|pool| pool.uid == namespace.pool_uid)
                .filter_map(|pool| pool.interleave_set(set_id))
                .any(|set| set.dimms.iter().any(|uid| uid == device_uid)),
            CreationId::DeviceHandle(handle) => handle == device.device_handle,
        };

        Ok(self.driver.namespaces()?.iter().filter(|ns| backed_by_device(ns)).count())
    }

    /// Returns the range of App Direct namespace sizes that a pool can currently host.
    ///
    /// If `format` is given, the largest size only considers interleave sets of the same width.
    ///
    /// # Errors
    ///
    /// If the caller lacks permissions or no driver is available, an error is returned. If the pool is unknown,
    /// `NotFound` is returned.
    pub fn available_persistent_size_range(
        &self, pool_uid: &str, format: Option<&InterleaveFormat>,
    ) -> Result<PossibleNamespaceRanges, PlannerError> {
        self.check_permissions_and_driver()?;

        let pool = self.driver.pool(pool_uid)?;
        let capabilities = self.driver.capabilities()?;
        Ok(pool_supported_size_ranges(
            &pool,
            &capabilities,
            format.map_or(0, |format| format.ways),
        ))
    }

    /// Creates a namespace on the given pool, returning its uid.
    ///
    /// If `allow_adjustment` is `true`, the requested block count is rounded down to the nearest aligned capacity for
    /// the chosen interleave set. If no friendly name is given, one is synthesized from the configured prefix.
    ///
    /// # Errors
    ///
    /// If any validation fails, an error describing the first failure is returned and the driver is not called. Errors
    /// from the driver are passed through.
    pub fn create_namespace(
        &self, pool_uid: &str, settings: &NamespaceCreateSettings, format: Option<&InterleaveFormat>,
        allow_adjustment: bool,
    ) -> Result<String, PlannerError> {
        self.check_access(Feature::CreateNamespace)?;
        let placement = self.validate_create(pool_uid, settings, format, allow_adjustment)?;

        let friendly_name = match settings.friendly_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.next_default_name()?,
        };

        let request = NamespaceCreateRequest {
            namespace_type: settings.namespace_type,
            creation_id: CreationId::InterleaveSet(placement.interleave_set_id),
            friendly_name,
            enabled: settings.enabled,
            block_size: settings.block_size,
            block_count: placement.block_count,
            btt: settings.btt,
            memory_page_allocation: settings.memory_page_allocation,
        };
        let uid = self.driver.create_namespace(&request)?;

        self.cache.invalidate();
        self.events.log_event(ManagementEvent::info(
            EventCode::NamespaceCreated,
            &uid,
            &request.friendly_name,
        ));
        info!(
            %uid, pool_uid, interleave_set_id = placement.interleave_set_id, block_count = placement.block_count,
            "Created namespace."
        );

        Ok(uid)
    }

    /// Validates creation settings with block count adjustment enabled, without creating anything.
    ///
    /// Returns the settings with the block count that creation would use.
    ///
    /// # Errors
    ///
    /// If any validation fails, an error describing the first failure is returned.
    pub fn adjust_create_namespace_block_count(
        &self, pool_uid: &str, settings: &NamespaceCreateSettings, format: Option<&InterleaveFormat>,
    ) -> Result<NamespaceCreateSettings, PlannerError> {
        self.check_access(Feature::CreateNamespace)?;
        let placement = self.validate_create(pool_uid, settings, format, true)?;

        Ok(NamespaceCreateSettings {
            block_count: placement.block_count,
            ..settings.clone()
        })
    }

    /// Changes the block count of a namespace, returning the block count it ends up with.
    ///
    /// If `allow_adjustment` is `true`, the requested block count is rounded down to the nearest aligned capacity for
    /// the namespace's interleave set.
    ///
    /// # Errors
    ///
    /// If the new capacity equals the current capacity, `BadSize` is returned. If any other validation fails, an error
    /// describing the first failure is returned and the driver is not called. Errors from the driver are passed
    /// through.
    pub fn resize_namespace(&self, uid: &str, block_count: u64, allow_adjustment: bool) -> Result<u64, PlannerError> {
        self.check_permissions_and_driver()?;
        let (record, block_count) = self.validate_resize(uid, block_count, allow_adjustment)?;

        self.driver.resize_namespace(uid, block_count)?;

        self.cache.invalidate();
        self.events.log_event(ManagementEvent::info(
            EventCode::NamespaceModified,
            uid,
            &record.friendly_name,
        ));
        info!(uid, from = record.block_count, to = block_count, "Resized namespace.");

        Ok(block_count)
    }

    /// Validates a new block count for a namespace with adjustment enabled, without resizing anything.
    ///
    /// Returns the block count that a resize would use.
    ///
    /// # Errors
    ///
    /// If any validation fails, an error describing the first failure is returned.
    pub fn adjust_modify_namespace_block_count(&self, uid: &str, block_count: u64) -> Result<u64, PlannerError> {
        self.check_permissions_and_driver()?;
        self.validate_resize(uid, block_count, true)
            .map(|(_, block_count)| block_count)
    }

    /// Renames a namespace.
    ///
    /// # Errors
    ///
    /// If the name is empty, `InvalidParameter` is returned. If any member Dimm of the namespace's interleave set is
    /// locked, `BadSecurityState` is returned. Errors from the driver are passed through.
    pub fn rename_namespace(&self, uid: &str, friendly_name: &str) -> Result<(), PlannerError> {
        self.check_access(Feature::RenameNamespace)?;
        if friendly_name.is_empty() {
            return Err(PlannerError::InvalidParameter {
                reason: "friendly name is empty",
            });
        }

        let record = self.driver.namespace(uid)?;
        self.check_unlocked(&record)?;

        self.driver.rename_namespace(uid, friendly_name)?;

        self.cache.invalidate();
        self.events
            .log_event(ManagementEvent::info(EventCode::NamespaceModified, uid, friendly_name));
        info!(uid, from = %record.friendly_name, to = friendly_name, "Renamed namespace.");

        Ok(())
    }

    /// Enables or disables a namespace.
    ///
    /// Requesting the state a namespace is already in succeeds without calling the driver.
    ///
    /// # Errors
    ///
    /// If the requested state is neither `Enabled` nor `Disabled`, `BadNamespaceEnableState` is returned. If any member
    /// Dimm of the namespace's interleave set is locked, `BadSecurityState` is returned. Errors from the driver are
    /// passed through.
    pub fn set_namespace_enabled(&self, uid: &str, enabled: EnableState) -> Result<(), PlannerError> {
        self.check_permissions_and_driver()?;

        let feature = match enabled {
            EnableState::Enabled => Feature::EnableNamespace,
            EnableState::Disabled => Feature::DisableNamespace,
            EnableState::Unknown => return Err(PlannerError::BadNamespaceEnableState),
        };
        self.licensing.check_licensed(feature)?;

        let record = self.driver.namespace(uid)?;
        if record.enabled == enabled {
            debug!(uid, ?enabled, "Namespace already in requested enable state.");
            return Ok(());
        }
        self.check_unlocked(&record)?;

        self.driver.set_namespace_enabled(uid, enabled)?;

        self.cache.invalidate();
        self.events.log_event(ManagementEvent::info(
            EventCode::NamespaceModified,
            uid,
            &record.friendly_name,
        ));
        info!(uid, ?enabled, "Changed namespace enable state.");

        Ok(())
    }

    /// Deletes a namespace.
    ///
    /// Outstanding action-required events about the namespace are acknowledged once it is gone.
    ///
    /// # Errors
    ///
    /// If the namespace is unknown, `NotFound` is returned. Errors from the driver are passed through.
    pub fn delete_namespace(&self, uid: &str) -> Result<(), PlannerError> {
        self.check_access(Feature::DeleteNamespace)?;

        let record = self.driver.namespace(uid)?;
        self.driver.delete_namespace(uid)?;

        self.cache.invalidate();
        self.events.log_event(ManagementEvent::info(
            EventCode::NamespaceDeleted,
            uid,
            &record.friendly_name,
        ));
        self.events.acknowledge_action_required(uid);
        info!(uid, friendly_name = %record.friendly_name, "Deleted namespace.");

        Ok(())
    }

    fn check_permissions_and_driver(&self) -> Result<(), PlannerError> {
        if !self.driver.caller_has_permissions() {
            return Err(PlannerError::InvalidPermissions);
        }
        if !self.driver.is_driver_available() {
            return Err(PlannerError::BadDriver);
        }
        Ok(())
    }

    fn check_access(&self, feature: Feature) -> Result<(), PlannerError> {
        self.check_permissions_and_driver()?;
        self.licensing.check_licensed(feature)
    }

    fn validate_create(
        &self, pool_uid: &str, settings: &NamespaceCreateSettings, format: Option<&InterleaveFormat>,
        allow_adjustment: bool,
    ) -> Result<Placement, PlannerError> {
        let pool = self.driver.pool(pool_uid)?;
        pool.check_health()?;

        let capabilities = self.driver.capabilities()?;
        let ranges = pool_supported_size_ranges(&pool, &capabilities, format.map_or(0, |format| format.ways));

        if settings.namespace_type != NamespaceType::AppDirect {
            return Err(PlannerError::BadNamespaceType {
                reason: "only App Direct namespaces can be created",
            });
        }
        if !capabilities.app_direct_mode {
            return Err(PlannerError::NotSupported {
                reason: "App Direct mode is not supported by the platform".to_string(),
            });
        }
        if ranges.largest == 0 {
            error!(pool_uid, "Pool has no capacity left for App Direct namespaces.");
            return Err(PlannerError::TooManyNamespaces {
                pool_uid: pool.uid.clone(),
            });
        }
        if settings.btt && settings.memory_page_allocation.is_allocated() {
            return Err(PlannerError::NotSupported {
                reason: "a block translation table cannot be combined with memory page allocation".to_string(),
            });
        }
        if settings.memory_page_allocation.is_allocated() && !capabilities.memory_page_allocation_capable {
            return Err(PlannerError::NotSupported {
                reason: "memory page allocation is not supported by the platform".to_string(),
            });
        }
        if !pool.pool_type.is_persistent() {
            return Err(PlannerError::BadNamespaceType {
                reason: "App Direct namespaces require a persistent pool",
            });
        }
        if !matches!(settings.enabled, EnableState::Enabled | EnableState::Disabled) {
            return Err(PlannerError::BadNamespaceEnableState);
        }
        if settings.block_size != 1 {
            return Err(PlannerError::BadBlockSize {
                block_size: settings.block_size,
            });
        }

        let requested_bytes = settings.capacity();
        if requested_bytes > pool.free_capacity {
            error!(
                pool_uid,
                requested_bytes,
                available_bytes = pool.free_capacity,
                "Requested capacity exceeds pool free capacity."
            );
            return Err(PlannerError::BadSize {
                reason: format!(
                    "{} bytes requested but pool {} has {} bytes free",
                    requested_bytes, pool.uid, pool.free_capacity
                ),
            });
        }
        if requested_bytes > ranges.largest {
            error!(
                pool_uid,
                requested_bytes,
                largest_bytes = ranges.largest,
                "Requested capacity exceeds largest possible namespace."
            );
            return Err(PlannerError::BadSize {
                reason: format!(
                    "{} bytes requested but the largest possible namespace is {} bytes",
                    requested_bytes, ranges.largest
                ),
            });
        }

        let devices = self.driver.devices()?;
        InterleaveSetSelector::new(&pool, &capabilities, &devices).select(settings, format, allow_adjustment)
    }

    fn validate_resize(
        &self, uid: &str, block_count: u64, allow_adjustment: bool,
    ) -> Result<(NamespaceRecord, u64), PlannerError> {
        if block_count == 0 {
            return Err(PlannerError::BadSize {
                reason: "block count must be greater than zero".to_string(),
            });
        }

        let record = self.driver.namespace(uid)?;
        check_capacity_changes(&record, block_count)?;
        let feature = if block_count > record.block_count {
            Feature::GrowNamespace
        } else {
            Feature::ShrinkNamespace
        };
        self.licensing.check_licensed(feature)?;

        let pool = self.driver.pool(&record.pool_uid)?;
        pool.check_health()?;

        let block_size = u64::from(record.block_size);
        let requested_growth = block_count.saturating_mul(block_size).saturating_sub(record.capacity());
        if requested_growth > pool.free_capacity {
            error!(
                uid,
                requested_bytes = requested_growth,
                available_bytes = pool.free_capacity,
                "Requested growth exceeds pool free capacity."
            );
            return Err(PlannerError::BadSize {
                reason: format!(
                    "{} more bytes requested but pool {} has {} bytes free",
                    requested_growth, pool.uid, pool.free_capacity
                ),
            });
        }

        if record.namespace_type != NamespaceType::AppDirect {
            return Err(PlannerError::BadNamespaceType {
                reason: "only App Direct namespaces can be resized",
            });
        }
        let set = backing_set(&record, &pool)?;

        let capabilities = self.driver.capabilities()?;
        let alignment = capabilities.interleave_alignment_bytes();
        let ways = set.dimm_count();
        let block_count =
            adjust_block_count_if_allowed(block_count, record.block_size, ways, alignment, allow_adjustment);
        check_capacity_changes(&record, block_count)?;
        let new_capacity = block_count.saturating_mul(block_size);

        let growth = new_capacity.saturating_sub(record.capacity());
        if growth > set.available_size {
            error!(
                uid,
                requested_bytes = growth,
                available_bytes = set.available_size,
                "Requested growth exceeds interleave set available capacity."
            );
            return Err(PlannerError::BadSize {
                reason: format!(
                    "{} more bytes requested but interleave set {} has {} bytes available",
                    growth, set.driver_id, set.available_size
                ),
            });
        }

        let minimum_bytes = minimum_namespace_size(ways, alignment);
        if new_capacity < minimum_bytes {
            error!(uid, new_capacity, minimum_bytes, "Requested capacity is below the namespace minimum.");
            return Err(PlannerError::BadSize {
                reason: format!(
                    "{} bytes requested but namespaces on {} Dimms need at least {} GiB",
                    new_capacity,
                    ways,
                    minimum_bytes / BYTES_PER_GIB
                ),
            });
        }
        if !is_aligned(new_capacity, ways, alignment) {
            error!(uid, new_capacity, ways, alignment, "Requested capacity is not aligned.");
            return Err(PlannerError::BadAlignment {
                reason: format!(
                    "{} bytes is not a multiple of {} Dimms times {} bytes",
                    new_capacity, ways, alignment
                ),
            });
        }

        let devices = self.driver.devices()?;
        if set.has_locked_member(&devices) {
            return Err(PlannerError::BadSecurityState);
        }

        Ok((record, block_count))
    }

    fn check_unlocked(&self, record: &NamespaceRecord) -> Result<(), PlannerError> {
        if record.namespace_type != NamespaceType::AppDirect {
            return Err(PlannerError::BadNamespaceType {
                reason: "only App Direct namespaces are supported",
            });
        }

        let pool = self.driver.pool(&record.pool_uid)?;
        let set = backing_set(record, &pool)?;
        let devices = self.driver.devices()?;
        if set.has_locked_member(&devices) {
            error!(uid = %record.uid, interleave_set_id = set.driver_id, "Namespace has locked Dimms.");
            return Err(PlannerError::BadSecurityState);
        }
        Ok(())
    }

    fn next_default_name(&self) -> Result<String, PlannerError> {
        let highest = self
            .driver
            .namespaces()?
            .iter()
            .filter_map(|namespace| namespace.friendly_name.strip_prefix(self.default_name_prefix.as_str()))
            .filter(|suffix| suffix.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0);

        Ok(format!("{}{}", self.default_name_prefix, highest.saturating_add(1)))
    }
}

fn check_capacity_changes(record: &NamespaceRecord, block_count: u64) -> Result<(), PlannerError> {
    let new_capacity = block_count.saturating_mul(u64::from(record.block_size));
    if new_capacity == record.capacity() {
        error!(uid = %record.uid, capacity = new_capacity, "Requested capacity matches current capacity.");
        return Err(PlannerError::BadSize {
            reason: format!("namespace {} is already {} bytes", record.uid, new_capacity),
        });
    }
    Ok(())
}

fn backing_set<'a>(record: &NamespaceRecord, pool: &'a Pool) -> Result<&'a InterleaveSet, PlannerError> {
    record
        .interleave_set_id()
        .and_then(|set_id| pool.interleave_set(set_id))
        .ok_or_else(|| PlannerError::DriverFailed {
            reason: format!(
                "namespace {} has no backing interleave set in pool {}",
                record.uid, pool.uid
            ),
        })
}
