//! [`JointRemapIndex`] – maps the bridge's canonical joint order onto the
//! order a control board reports its axes in.

use nalgebra::DVector;
use sensorbridge_types::BridgeError;
use tracing::debug;

/// Entry `i` is the position of canonical joint `i` in the control board's
/// reporting order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointRemapIndex {
    indices: Vec<usize>,
}

impl JointRemapIndex {
    /// Resolve every canonical joint against the live axis names.
    ///
    /// The live list is scanned from the start for each canonical joint and
    /// the first exact match wins; live names are assumed unique.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::RemapFailure`] naming the first canonical joint
    /// that the board does not report.
    pub fn build(canonical: &[String], live: &[String]) -> Result<Self, BridgeError> {
        let indices = canonical
            .iter()
            .map(|joint| {
                live.iter()
                    .position(|name| name == joint)
                    .ok_or_else(|| BridgeError::RemapFailure {
                        joint: joint.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (joint, index) in canonical.iter().zip(&indices) {
            debug!(joint = %joint, board_index = index, "remapped joint");
        }

        Ok(Self { indices })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    /// Write `raw` (board order) into `canonical` (bridge order).
    ///
    /// `canonical` must have [`len`](Self::len) entries and `raw` must cover
    /// every remapped index; both hold by construction at attachment time.
    pub fn apply(&self, raw: &[f64], canonical: &mut DVector<f64>) {
        for (slot, &index) in canonical.iter_mut().zip(&self.indices) {
            *slot = raw[index];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builds_permutation_for_shuffled_board() {
        let canonical = names(&["l_hip", "l_knee", "l_ankle"]);
        let live = names(&["l_ankle", "torso_yaw", "l_hip", "l_knee"]);
        let remap = JointRemapIndex::build(&canonical, &live).unwrap();
        assert_eq!(remap.as_slice(), &[2, 3, 0]);
        for (i, joint) in canonical.iter().enumerate() {
            assert_eq!(&live[remap.as_slice()[i]], joint);
        }
    }

    #[test]
    fn missing_joint_fails_instead_of_defaulting() {
        let canonical = names(&["l_hip", "r_hip"]);
        let live = names(&["l_hip", "l_knee"]);
        let err = JointRemapIndex::build(&canonical, &live).unwrap_err();
        assert_eq!(
            err,
            BridgeError::RemapFailure {
                joint: "r_hip".to_string()
            }
        );
    }

    #[test]
    fn apply_reorders_into_canonical_buffer() {
        let canonical = names(&["a", "b", "c"]);
        let live = names(&["c", "a", "b"]);
        let remap = JointRemapIndex::build(&canonical, &live).unwrap();

        let raw = [30.0, 10.0, 20.0];
        let mut out = DVector::zeros(3);
        remap.apply(&raw, &mut out);
        assert_eq!(out.as_slice(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn empty_canonical_list_is_trivially_valid() {
        let remap = JointRemapIndex::build(&[], &names(&["a"])).unwrap();
        assert!(remap.is_empty());
    }
}
