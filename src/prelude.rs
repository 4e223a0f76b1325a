//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::error::{Error, Result};

pub use crate::consts::axis::{AXIAL, CORONAL, SAGITTAL};
pub use crate::consts::{NS_GT, NS_INPUTS, NS_ROI};

pub use crate::container::{DatasetMeta, Hdf5Container};
pub use crate::meta::{BoundingBox, Role, SampleMetadata, SliceSel};
pub use crate::source::{subject_id_of, BoundingBoxMap, SourceRow, SourceTable};
pub use crate::volume::{save_identity, MriVolume};

pub use crate::dataset::{
    convert, hdf5_to_bids, AccessConfig, Cell, ConvertConfig, ConvertSummary, Dim, ExportSummary,
    HdfDataset, IndexRow, MetadataChoice, Sample, SampleIndex, UpdateStrategy,
};
pub use crate::transform::{Identity, SliceFilter, TransformStage};
