//! Custom resource types consumed by nodewright

mod mirror_set;

pub use mirror_set::{
    ImageDigestMirrorSet, ImageDigestMirrorSetSpec, ImageMirrorDeclaration, ImageTagMirrorSet,
    ImageTagMirrorSetSpec, MirrorSourcePolicy,
};
