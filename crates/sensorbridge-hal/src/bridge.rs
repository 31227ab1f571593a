//! [`SensorBridge`] – configuration, attachment and read gating in one
//! aggregate.
//!
//! # Lifecycle
//!
//! ```text
//!  Uninitialized ──initialize──▶ Initialized ──attach ok──▶ Attached
//!                                    ▲   │                    │  │
//!                                    │   └──attach err──▶ Invalid │
//!                                    └──────────reset───────┴────┘
//! ```
//!
//! `attach` may be re-run from `Attached` or `Invalid` with a fresh device
//! list.  Every attempt builds its bindings from scratch; a failed attempt
//! drops whatever it bound and leaves the bridge `Invalid`.

use nalgebra::{DMatrix, DVector};
use sensorbridge_types::{BridgeError, BridgeState, SensorCategory};
use tracing::{debug, error, info, warn};

use crate::attach::{Attachment, Transport};
use crate::buffers::{JointBuffers, MeasurementStore, Stamped};
use crate::capability::DeviceHandle;
use crate::config::{ParametersHandler, SensorBridgeConfig};

/// Reads and refreshes every configured sensor of a robot through the
/// device handles it was attached to.
pub struct SensorBridge {
    state: BridgeState,
    config: Option<SensorBridgeConfig>,
    attachment: Option<Attachment>,
}

impl Default for SensorBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorBridge {
    pub fn new() -> Self {
        Self {
            state: BridgeState::Uninitialized,
            config: None,
            attachment: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.state == BridgeState::Attached
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Load the configuration from a parameter source.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] unless the bridge is `Uninitialized`, or any
    /// configuration error from [`SensorBridgeConfig::from_parameters`].  A
    /// failed load leaves the bridge `Uninitialized`.
    pub fn initialize(&mut self, params: &dyn ParametersHandler) -> Result<(), BridgeError> {
        self.require(BridgeState::Uninitialized, "initialize")?;
        let config = SensorBridgeConfig::from_parameters(params).inspect_err(|e| {
            error!(error = %e, "failed to load sensor bridge configuration");
        })?;
        self.initialize_with(config)
    }

    /// Install an already-built configuration.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] unless the bridge is `Uninitialized`.
    pub fn initialize_with(&mut self, config: SensorBridgeConfig) -> Result<(), BridgeError> {
        self.require(BridgeState::Uninitialized, "initialize")?;
        let enabled: Vec<_> = config.enabled_categories().map(|c| c.to_string()).collect();
        info!(categories = ?enabled, dry_run = config.sensor_dry_run, "sensor bridge initialized");
        self.config = Some(config);
        self.state = BridgeState::Initialized;
        Ok(())
    }

    /// Bind every enabled category to `devices`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] when no configuration is loaded.  Any
    /// attachment error, or a read error from the dry-run poll, moves the
    /// bridge to `Invalid` and is returned unchanged.
    pub fn attach(&mut self, devices: &[DeviceHandle]) -> Result<(), BridgeError> {
        let config = match (&self.config, self.state) {
            (Some(config), BridgeState::Initialized | BridgeState::Attached | BridgeState::Invalid) => {
                config
            }
            _ => return Err(self.not_ready("attach")),
        };

        // Drop the previous bindings before building new ones.
        self.attachment = None;

        let result = Attachment::attach(config, devices).and_then(|mut attachment| {
            if config.sensor_dry_run {
                attachment.poll()?;
                log_dry_run(&attachment.store);
            }
            Ok(attachment)
        });

        match result {
            Ok(attachment) => {
                self.attachment = Some(attachment);
                self.state = BridgeState::Attached;
                info!(devices = devices.len(), "sensor bridge attached");
                Ok(())
            }
            Err(e) => {
                self.state = BridgeState::Invalid;
                error!(error = %e, category = ?e.category(), "sensor bridge attachment failed");
                Err(e)
            }
        }
    }

    /// Return to `Initialized`, dropping every binding and buffer.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] unless the bridge is `Attached` or `Invalid`.
    pub fn reset(&mut self) -> Result<(), BridgeError> {
        match self.state {
            BridgeState::Attached | BridgeState::Invalid => {
                self.attachment = None;
                self.state = BridgeState::Initialized;
                debug!("sensor bridge reset");
                Ok(())
            }
            _ => Err(self.not_ready("reset")),
        }
    }

    /// Refresh every bound buffer once.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] outside `Attached`; otherwise the first read
    /// error.  The bridge stays `Attached` after a read error.
    pub fn advance(&mut self) -> Result<(), BridgeError> {
        self.require(BridgeState::Attached, "advance")?;
        let Some(attachment) = self.attachment.as_mut() else {
            return Err(BridgeError::NotReady {
                operation: "advance".to_string(),
                state: BridgeState::Attached,
            });
        };
        attachment.poll().inspect_err(|e| {
            warn!(error = %e, "sensor bridge poll failed");
        })
    }

    // ── Metadata ───────────────────────────────────────────────────────────

    /// The loaded configuration.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] while `Uninitialized`.
    pub fn metadata(&self) -> Result<&SensorBridgeConfig, BridgeError> {
        self.config.as_ref().ok_or_else(|| self.not_ready("metadata"))
    }

    /// Configured instance names of `category`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] outside `Attached`.
    pub fn list(&self, category: SensorCategory) -> Result<&[String], BridgeError> {
        self.require(BridgeState::Attached, "list")?;
        Ok(self.metadata()?.expected(category))
    }

    pub fn joints_list(&self) -> Result<&[String], BridgeError> {
        self.list(SensorCategory::Joints)
    }

    pub fn imus_list(&self) -> Result<&[String], BridgeError> {
        self.list(SensorCategory::Imu)
    }

    pub fn linear_accelerometers_list(&self) -> Result<&[String], BridgeError> {
        self.list(SensorCategory::LinearAccelerometer)
    }

    pub fn gyroscopes_list(&self) -> Result<&[String], BridgeError> {
        self.list(SensorCategory::Gyroscope)
    }

    pub fn orientation_sensors_list(&self) -> Result<&[String], BridgeError> {
        self.list(SensorCategory::OrientationSensor)
    }

    pub fn magnetometers_list(&self) -> Result<&[String], BridgeError> {
        self.list(SensorCategory::Magnetometer)
    }

    pub fn six_axis_force_torque_sensors_list(&self) -> Result<&[String], BridgeError> {
        self.list(SensorCategory::SixAxisForceTorque)
    }

    pub fn cartesian_wrenches_list(&self) -> Result<&[String], BridgeError> {
        self.list(SensorCategory::CartesianWrench)
    }

    pub fn rgb_cameras_list(&self) -> Result<&[String], BridgeError> {
        self.list(SensorCategory::RgbCamera)
    }

    pub fn depth_cameras_list(&self) -> Result<&[String], BridgeError> {
        self.list(SensorCategory::DepthCamera)
    }

    /// Instance names actually bound for `category`, sorted.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] outside `Attached`.
    pub fn bound_instances(&self, category: SensorCategory) -> Result<Vec<String>, BridgeError> {
        Ok(self.attached("bound_instances")?.bound_names(category))
    }

    /// Which transport serves force/torque sensor `name`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] outside `Attached`, or
    /// [`BridgeError::UnknownInstance`] when `name` is not bound.
    pub fn force_torque_transport(&self, name: &str) -> Result<Transport, BridgeError> {
        self.attached("force_torque_transport")?
            .force_torque_transport(name)
            .ok_or_else(|| unknown(SensorCategory::SixAxisForceTorque, name))
    }

    /// Every buffer's store, for read-only inspection.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] outside `Attached`.
    pub fn measurements(&self) -> Result<&MeasurementStore, BridgeError> {
        Ok(&self.attached("measurements")?.store)
    }

    // ── Joint reads ────────────────────────────────────────────────────────

    /// Joint positions in configured order.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotReady`] outside `Attached`;
    /// [`BridgeError::CapabilityUnavailable`] when joints are not enabled.
    pub fn joint_positions(&self) -> Result<&Stamped<DVector<f64>>, BridgeError> {
        Ok(&self.joint_buffers("joint_positions")?.positions)
    }

    /// Joint velocities in configured order.
    ///
    /// # Errors
    ///
    /// Same as [`joint_positions`](Self::joint_positions).
    pub fn joint_velocities(&self) -> Result<&Stamped<DVector<f64>>, BridgeError> {
        Ok(&self.joint_buffers("joint_velocities")?.velocities)
    }

    /// Position of one joint.
    ///
    /// # Errors
    ///
    /// Same as [`joint_positions`](Self::joint_positions), plus
    /// [`BridgeError::UnknownInstance`] for a joint that is not configured.
    pub fn joint_position(&self, joint: &str) -> Result<f64, BridgeError> {
        let index = self.joint_index(joint)?;
        Ok(self.joint_positions()?.value[index])
    }

    /// Velocity of one joint.
    ///
    /// # Errors
    ///
    /// Same as [`joint_position`](Self::joint_position).
    pub fn joint_velocity(&self, joint: &str) -> Result<f64, BridgeError> {
        let index = self.joint_index(joint)?;
        Ok(self.joint_velocities()?.value[index])
    }

    // ── Named sensor reads ─────────────────────────────────────────────────

    /// 12-channel IMU reading.
    pub fn imu_measurement(&self, name: &str) -> Result<&Stamped<DVector<f64>>, BridgeError> {
        self.vector(SensorCategory::Imu, name)
    }

    pub fn linear_accelerometer_measurement(
        &self,
        name: &str,
    ) -> Result<&Stamped<DVector<f64>>, BridgeError> {
        self.vector(SensorCategory::LinearAccelerometer, name)
    }

    pub fn gyroscope_measurement(&self, name: &str) -> Result<&Stamped<DVector<f64>>, BridgeError> {
        self.vector(SensorCategory::Gyroscope, name)
    }

    pub fn orientation_sensor_measurement(
        &self,
        name: &str,
    ) -> Result<&Stamped<DVector<f64>>, BridgeError> {
        self.vector(SensorCategory::OrientationSensor, name)
    }

    pub fn magnetometer_measurement(
        &self,
        name: &str,
    ) -> Result<&Stamped<DVector<f64>>, BridgeError> {
        self.vector(SensorCategory::Magnetometer, name)
    }

    /// Six-axis force/torque reading, whichever transport serves it.
    pub fn six_axis_force_torque_measurement(
        &self,
        name: &str,
    ) -> Result<&Stamped<DVector<f64>>, BridgeError> {
        self.vector(SensorCategory::SixAxisForceTorque, name)
    }

    pub fn cartesian_wrench(&self, name: &str) -> Result<&Stamped<DVector<f64>>, BridgeError> {
        self.vector(SensorCategory::CartesianWrench, name)
    }

    /// Latest colour frame, `height` rows by `width` columns.
    pub fn color_image(&self, name: &str) -> Result<&Stamped<DMatrix<f64>>, BridgeError> {
        self.image(SensorCategory::RgbCamera, name)
    }

    /// Latest depth frame, `height` rows by `width` columns.
    pub fn depth_image(&self, name: &str) -> Result<&Stamped<DMatrix<f64>>, BridgeError> {
        self.image(SensorCategory::DepthCamera, name)
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn not_ready(&self, operation: &str) -> BridgeError {
        BridgeError::NotReady {
            operation: operation.to_string(),
            state: self.state,
        }
    }

    fn require(&self, state: BridgeState, operation: &str) -> Result<(), BridgeError> {
        if self.state == state {
            Ok(())
        } else {
            Err(self.not_ready(operation))
        }
    }

    fn attached(&self, operation: &str) -> Result<&Attachment, BridgeError> {
        self.require(BridgeState::Attached, operation)?;
        self.attachment
            .as_ref()
            .ok_or_else(|| self.not_ready(operation))
    }

    fn joint_buffers(&self, operation: &str) -> Result<&JointBuffers, BridgeError> {
        self.attached(operation)?
            .store
            .joints()
            .ok_or(BridgeError::CapabilityUnavailable {
                category: SensorCategory::Joints,
                name: None,
            })
    }

    fn joint_index(&self, joint: &str) -> Result<usize, BridgeError> {
        self.joints_list()?
            .iter()
            .position(|j| j == joint)
            .ok_or_else(|| unknown(SensorCategory::Joints, joint))
    }

    fn vector(
        &self,
        category: SensorCategory,
        name: &str,
    ) -> Result<&Stamped<DVector<f64>>, BridgeError> {
        self.attached("read")?
            .store
            .vector(category, name)
            .ok_or_else(|| unknown(category, name))
    }

    fn image(&self, category: SensorCategory, name: &str) -> Result<&Stamped<DMatrix<f64>>, BridgeError> {
        self.attached("read")?
            .store
            .image(category, name)
            .ok_or_else(|| unknown(category, name))
    }
}

fn unknown(category: SensorCategory, name: &str) -> BridgeError {
    BridgeError::UnknownInstance {
        category,
        name: name.to_string(),
    }
}

fn log_dry_run(store: &MeasurementStore) {
    if let Some(joints) = store.joints() {
        info!(
            positions = ?joints.positions.value.as_slice(),
            velocities = ?joints.velocities.value.as_slice(),
            stamp = joints.positions.receive_time_s,
            "dry run: joints"
        );
    }
    for (category, name, shape) in store.shapes() {
        if let Some(reading) = store.vector(category, &name) {
            info!(
                category = %category,
                instance = %name,
                values = ?reading.value.as_slice(),
                stamp = reading.receive_time_s,
                "dry run"
            );
        } else if let Some(frame) = store.image(category, &name) {
            info!(
                category = %category,
                instance = %name,
                shape = %shape,
                stamp = frame.receive_time_s,
                "dry run"
            );
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
