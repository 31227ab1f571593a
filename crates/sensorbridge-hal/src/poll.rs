//! One refresh pass over every bound view.

use std::sync::Arc;

use nalgebra::DMatrix;
use sensorbridge_types::{BridgeError, SensorCategory, Shape};

use crate::attach::{AggregateBinding, Attachment, AttachmentRecord, ControlBoardBinding};
use crate::buffers::{MeasurementStore, wall_clock_s};
use crate::capability::{AnalogSensor, Bound, DeviceFault, GenericSensor};

impl Attachment {
    /// Refresh every buffer in place.  Stops at the first failing view;
    /// buffers refreshed before it keep their new values.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::ReadFailed`] – a driver was closed or reported a fault.
    /// - [`BridgeError::ShapeMismatch`] – a camera's live frame size no longer
    ///   matches its buffer; the buffer is left untouched.
    pub(crate) fn poll(&mut self) -> Result<(), BridgeError> {
        if let Some(board) = &mut self.control_board {
            poll_control_board(board, &mut self.store)?;
        }

        poll_channels(
            SensorCategory::Imu,
            &self.imus,
            |v: &(dyn GenericSensor + 'static), out: &mut [f64]| v.read(out),
            &mut self.store,
        )?;

        for (category, record) in &self.aggregates {
            poll_aggregate(*category, record, &mut self.store)?;
        }

        poll_channels(
            SensorCategory::SixAxisForceTorque,
            &self.analog_force_torque,
            |v: &(dyn AnalogSensor + 'static), out: &mut [f64]| v.read(out),
            &mut self.store,
        )?;

        poll_channels(
            SensorCategory::CartesianWrench,
            &self.cartesian_wrenches,
            |v: &(dyn GenericSensor + 'static), out: &mut [f64]| v.read(out),
            &mut self.store,
        )?;

        for (name, bound) in self.rgb_cameras.iter() {
            let camera = upgrade(SensorCategory::RgbCamera, name, bound)?;
            poll_image(
                SensorCategory::RgbCamera,
                name,
                camera.frame_size(),
                |frame| camera.grab(frame),
                &mut self.store,
            )?;
        }

        for (name, bound) in self.depth_cameras.iter() {
            let camera = upgrade(SensorCategory::DepthCamera, name, bound)?;
            poll_image(
                SensorCategory::DepthCamera,
                name,
                camera.depth_size(),
                |frame| camera.grab_depth(frame),
                &mut self.store,
            )?;
        }

        Ok(())
    }
}

fn upgrade<V: ?Sized>(
    category: SensorCategory,
    name: &str,
    bound: &Bound<V>,
) -> Result<Arc<V>, BridgeError> {
    bound.upgrade().ok_or_else(|| BridgeError::ReadFailed {
        category,
        name: name.to_string(),
        details: "device was closed".to_string(),
    })
}

fn read_failed(category: SensorCategory, name: &str, fault: DeviceFault) -> BridgeError {
    BridgeError::ReadFailed {
        category,
        name: name.to_string(),
        details: fault.to_string(),
    }
}

fn missing_buffer(category: SensorCategory, name: &str) -> BridgeError {
    BridgeError::UnknownInstance {
        category,
        name: name.to_string(),
    }
}

fn poll_control_board(
    board: &mut ControlBoardBinding,
    store: &mut MeasurementStore,
) -> Result<(), BridgeError> {
    const BOARD: &str = "control board";
    let category = SensorCategory::Joints;

    let encoders = upgrade(category, BOARD, &board.encoders)?;
    let stamp = encoders
        .encoders_timed(&mut board.raw_positions)
        .map_err(|fault| read_failed(category, BOARD, fault))?;
    encoders
        .encoder_speeds(&mut board.raw_velocities)
        .map_err(|fault| read_failed(category, BOARD, fault))?;

    let joints = store
        .joints_mut()
        .ok_or_else(|| missing_buffer(category, BOARD))?;
    board.remap.apply(&board.raw_positions, &mut joints.positions.value);
    board.remap.apply(&board.raw_velocities, &mut joints.velocities.value);
    joints.positions.receive_time_s = stamp;
    joints.velocities.receive_time_s = stamp;
    Ok(())
}

/// Streams without their own timestamp are stamped with the wall clock.
fn poll_channels<V: ?Sized>(
    category: SensorCategory,
    record: &AttachmentRecord<Bound<V>>,
    read: impl Fn(&V, &mut [f64]) -> Result<(), DeviceFault>,
    store: &mut MeasurementStore,
) -> Result<(), BridgeError> {
    for (name, bound) in record.iter() {
        let view = upgrade(category, name, bound)?;
        let buffer = store
            .vector_mut(category, name)
            .ok_or_else(|| missing_buffer(category, name))?;
        read(&*view, buffer.value.as_mut_slice()).map_err(|fault| read_failed(category, name, fault))?;
        buffer.receive_time_s = wall_clock_s();
    }
    Ok(())
}

fn poll_aggregate(
    category: SensorCategory,
    record: &AttachmentRecord<AggregateBinding>,
    store: &mut MeasurementStore,
) -> Result<(), BridgeError> {
    for (name, binding) in record.iter() {
        let view = upgrade(category, name, &binding.view)?;
        let buffer = store
            .vector_mut(category, name)
            .ok_or_else(|| missing_buffer(category, name))?;
        buffer.receive_time_s = view
            .measure(binding.index, buffer.value.as_mut_slice())
            .map_err(|fault| read_failed(category, name, fault))?;
    }
    Ok(())
}

fn poll_image(
    category: SensorCategory,
    name: &str,
    (width, height): (usize, usize),
    grab: impl FnOnce(&mut DMatrix<f64>) -> Result<(), DeviceFault>,
    store: &mut MeasurementStore,
) -> Result<(), BridgeError> {
    let buffer = store
        .image_mut(category, name)
        .ok_or_else(|| missing_buffer(category, name))?;

    let expected = Shape::Image {
        width: buffer.value.ncols(),
        height: buffer.value.nrows(),
    };
    let found = Shape::Image { width, height };
    if found != expected {
        return Err(BridgeError::ShapeMismatch {
            category,
            name: name.to_string(),
            expected,
            found,
        });
    }

    grab(&mut buffer.value).map_err(|fault| read_failed(category, name, fault))?;
    buffer.receive_time_s = wall_clock_s();
    Ok(())
}
