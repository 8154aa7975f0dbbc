//! Rig animations: a skeleton schema plus per-bone matrix-op animations.
//!
//! Bones are stored flattened in root-to-bone order: every bone's parent
//! index precedes it, so global transforms can be computed in one forward
//! pass over the array.

use thiserror::Error;

use crate::api::ops::MatrixOpList;
use crate::api::AnimTime;

/// Errors from rig-animation construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RigError {
    #[error("rig animation has no bones")]
    Empty,
    #[error("bone {index} references parent {parent} that does not precede it")]
    ParentOrder { index: usize, parent: usize },
}

/// One bone: its name, its parent (root bones have none), and the matrix
/// operations animating its local transform.
#[derive(Debug, Clone)]
pub struct BoneAnim {
    pub name: String,
    pub parent: Option<usize>,
    pub ops: MatrixOpList,
}

impl BoneAnim {
    pub fn new(name: impl Into<String>, parent: Option<usize>, ops: MatrixOpList) -> Self {
        Self {
            name: name.into(),
            parent,
            ops,
        }
    }
}

/// An articulated skeleton with per-bone animations.
#[derive(Debug, Clone)]
pub struct RigAnim {
    bones: Vec<BoneAnim>,
    end_time: AnimTime,
    repeats: bool,
}

impl RigAnim {
    /// Build a rig animation, validating root-to-bone bone order.
    pub fn new(bones: Vec<BoneAnim>, end_time: AnimTime, repeats: bool) -> Result<Self, RigError> {
        if bones.is_empty() {
            return Err(RigError::Empty);
        }
        for (index, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= index {
                    return Err(RigError::ParentOrder { index, parent });
                }
            }
        }
        Ok(Self {
            bones,
            end_time: end_time.max(0),
            repeats,
        })
    }

    pub fn bones(&self) -> &[BoneAnim] {
        &self.bones
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    /// Engine-time length of one playthrough.
    pub fn end_time(&self) -> AnimTime {
        self.end_time
    }

    pub fn repeats(&self) -> bool {
        self.repeats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    use crate::api::ops::{MatrixOp, MatrixOpKind};

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(RigAnim::new(Vec::new(), 100, false), Err(RigError::Empty)));
    }

    #[test]
    fn test_rejects_forward_parent() {
        let bones = vec![
            BoneAnim::new("root", None, smallvec![]),
            BoneAnim::new("arm", Some(2), smallvec![]),
            BoneAnim::new("hand", Some(1), smallvec![]),
        ];
        assert!(matches!(
            RigAnim::new(bones, 100, false),
            Err(RigError::ParentOrder {
                index: 1,
                parent: 2
            })
        ));
    }

    #[test]
    fn test_accepts_root_to_bone_order() {
        let bones = vec![
            BoneAnim::new(
                "root",
                None,
                smallvec![MatrixOp::constant(MatrixOpKind::TranslateX, 1.0)],
            ),
            BoneAnim::new("child", Some(0), smallvec![]),
        ];
        let anim = RigAnim::new(bones, 250, true).unwrap();
        assert_eq!(anim.bone_count(), 2);
        assert_eq!(anim.end_time(), 250);
        assert!(anim.repeats());
    }
}
