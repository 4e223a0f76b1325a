//! 数据集物化、索引与随机访问.
//!
//! 依赖顺序: [`convert`] 生成容器, [`index`] 在容器上建表,
//! [`access`] 消费索引提供逐样本访问, [`export`] 反向还原目录布局.

pub mod access;
pub mod convert;
pub mod export;
pub mod index;

pub use access::{AccessConfig, HdfDataset, Sample, UpdateStrategy};
pub use convert::{convert, ConvertConfig, ConvertSummary, MetadataChoice};
pub use export::{hdf5_to_bids, ExportSummary};
pub use index::{Cell, IndexRow, SampleIndex};

/// 样本维度: 2D 切片或 3D 体数据.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dim {
    /// 2D. 索引表逐保留切片展开, 每行寻址单个切片.
    D2,

    /// 3D. 每行寻址一个受试者的整个保留切片栈.
    D3,
}
