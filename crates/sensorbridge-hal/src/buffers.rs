//! [`MeasurementStore`] – pre-sized measurement buffers keyed by instance
//! name.
//!
//! Buffers are allocated once while attaching and then only written in
//! place: the store has no resize path, so a buffer's shape after
//! attachment never changes.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use nalgebra::{DMatrix, DVector};
use sensorbridge_types::{SensorCategory, Shape};

/// A buffer together with the time (seconds) it was last refreshed.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub value: T,
    pub receive_time_s: f64,
}

impl<T> Stamped<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            receive_time_s: 0.0,
        }
    }
}

/// Wall-clock time in seconds, used to stamp readings whose transport
/// carries no timestamp of its own.
pub(crate) fn wall_clock_s() -> f64 {
    Utc::now().timestamp_micros() as f64 * 1e-6
}

/// Joint-domain buffers, in canonical joint order.
#[derive(Debug, Clone)]
pub struct JointBuffers {
    pub positions: Stamped<DVector<f64>>,
    pub velocities: Stamped<DVector<f64>>,
}

/// Every buffer a bridge exposes to readers.
#[derive(Debug, Clone, Default)]
pub struct MeasurementStore {
    joints: Option<JointBuffers>,
    vectors: BTreeMap<SensorCategory, HashMap<String, Stamped<DVector<f64>>>>,
    images: BTreeMap<SensorCategory, HashMap<String, Stamped<DMatrix<f64>>>>,
}

impl MeasurementStore {
    /// Zero-filled position and velocity buffers for `joints` canonical joints.
    pub(crate) fn allocate_joints(&mut self, joints: usize) {
        self.joints = Some(JointBuffers {
            positions: Stamped::new(DVector::zeros(joints)),
            velocities: Stamped::new(DVector::zeros(joints)),
        });
    }

    pub(crate) fn allocate_vector(&mut self, category: SensorCategory, name: &str, channels: usize) {
        self.vectors
            .entry(category)
            .or_default()
            .insert(name.to_string(), Stamped::new(DVector::zeros(channels)));
    }

    /// Zero-filled `height` x `width` image buffer.
    pub(crate) fn allocate_image(
        &mut self,
        category: SensorCategory,
        name: &str,
        width: usize,
        height: usize,
    ) {
        self.images
            .entry(category)
            .or_default()
            .insert(name.to_string(), Stamped::new(DMatrix::zeros(height, width)));
    }

    pub fn joints(&self) -> Option<&JointBuffers> {
        self.joints.as_ref()
    }

    pub(crate) fn joints_mut(&mut self) -> Option<&mut JointBuffers> {
        self.joints.as_mut()
    }

    pub fn vector(&self, category: SensorCategory, name: &str) -> Option<&Stamped<DVector<f64>>> {
        self.vectors.get(&category)?.get(name)
    }

    pub(crate) fn vector_mut(
        &mut self,
        category: SensorCategory,
        name: &str,
    ) -> Option<&mut Stamped<DVector<f64>>> {
        self.vectors.get_mut(&category)?.get_mut(name)
    }

    pub fn image(&self, category: SensorCategory, name: &str) -> Option<&Stamped<DMatrix<f64>>> {
        self.images.get(&category)?.get(name)
    }

    pub(crate) fn image_mut(
        &mut self,
        category: SensorCategory,
        name: &str,
    ) -> Option<&mut Stamped<DMatrix<f64>>> {
        self.images.get_mut(&category)?.get_mut(name)
    }

    /// Shape of the buffer bound to `name`, if any.
    pub fn shape(&self, category: SensorCategory, name: &str) -> Option<Shape> {
        if let Some(v) = self.vector(category, name) {
            return Some(Shape::Channels(v.value.len()));
        }
        self.image(category, name).map(|img| Shape::Image {
            width: img.value.ncols(),
            height: img.value.nrows(),
        })
    }

    /// Shapes of every buffer, joints first.  Used to check that polling
    /// never reshapes anything.
    pub fn shapes(&self) -> Vec<(SensorCategory, String, Shape)> {
        let mut shapes = Vec::new();
        if let Some(joints) = &self.joints {
            shapes.push((
                SensorCategory::Joints,
                "positions".to_string(),
                Shape::Channels(joints.positions.value.len()),
            ));
            shapes.push((
                SensorCategory::Joints,
                "velocities".to_string(),
                Shape::Channels(joints.velocities.value.len()),
            ));
        }
        for (category, buffers) in &self.vectors {
            let mut names: Vec<_> = buffers.keys().collect();
            names.sort();
            for name in names {
                if let Some(shape) = self.shape(*category, name) {
                    shapes.push((*category, name.clone(), shape));
                }
            }
        }
        for (category, buffers) in &self.images {
            let mut names: Vec<_> = buffers.keys().collect();
            names.sort();
            for name in names {
                if let Some(shape) = self.shape(*category, name) {
                    shapes.push((*category, name.clone(), shape));
                }
            }
        }
        shapes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_zero_fills_with_requested_shape() {
        let mut store = MeasurementStore::default();
        store.allocate_joints(4);
        store.allocate_vector(SensorCategory::Imu, "head_imu", 12);
        store.allocate_image(SensorCategory::RgbCamera, "cam0", 640, 480);

        let joints = store.joints().unwrap();
        assert_eq!(joints.positions.value.len(), 4);
        assert!(joints.velocities.value.iter().all(|v| *v == 0.0));

        assert_eq!(
            store.shape(SensorCategory::Imu, "head_imu"),
            Some(Shape::Channels(12))
        );
        let img = store.image(SensorCategory::RgbCamera, "cam0").unwrap();
        assert_eq!(img.value.nrows(), 480);
        assert_eq!(img.value.ncols(), 640);
        assert_eq!(
            store.shape(SensorCategory::RgbCamera, "cam0"),
            Some(Shape::Image {
                width: 640,
                height: 480
            })
        );
    }

    #[test]
    fn same_name_in_different_categories_is_distinct() {
        let mut store = MeasurementStore::default();
        store.allocate_vector(SensorCategory::Gyroscope, "head", 3);
        store.allocate_vector(SensorCategory::Magnetometer, "head", 3);
        store
            .vector_mut(SensorCategory::Gyroscope, "head")
            .unwrap()
            .value
            .fill(1.0);
        assert_eq!(
            store.vector(SensorCategory::Magnetometer, "head").unwrap().value.sum(),
            0.0
        );
    }

    #[test]
    fn shapes_lists_every_buffer() {
        let mut store = MeasurementStore::default();
        store.allocate_joints(2);
        store.allocate_vector(SensorCategory::CartesianWrench, "l_hand", 6);
        store.allocate_image(SensorCategory::DepthCamera, "depth0", 4, 3);
        let shapes = store.shapes();
        assert_eq!(shapes.len(), 4);
        assert_eq!(
            shapes.last().unwrap().2,
            Shape::Image {
                width: 4,
                height: 3
            }
        );
    }

    #[test]
    fn unknown_name_has_no_shape() {
        let store = MeasurementStore::default();
        assert!(store.shape(SensorCategory::Imu, "ghost").is_none());
    }
}
