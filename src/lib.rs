#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 将 BIDS 组织的 MRI 训练数据物化为单文件 HDF5 容器,
//! 并在容器上提供索引、随机访问与反向导出.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 数据按 BIDS 模式组织即可工作, 不依赖特定采集协议;
//!    目录索引由外部组件产出, 本 crate 只消费其描述表.
//! 2. 在非期望情况下 (程序员错误, 如切片轴越界), 程序会直接
//!    panic, 而不会导致内存错误. As what Rust promises.
//!    I/O 与数据完备性问题一律以 `Result` 返回.
//!
//! # 模块地图
//!
//! - 体数据读写与切片轴归一化: `src/volume.rs`.
//! - HDF5 容器布局与属性读写: `src/container.rs`.
//! - 目录 → 容器的一次性物化: `src/dataset/convert.rs`.
//! - 容器上的样本索引表与 CSV 持久化: `src/dataset/index.rs`.
//! - 随机访问与模态缺失模拟: `src/dataset/access.rs`.
//! - 容器 → BIDS 布局的反向导出: `src/dataset/export.rs`.
//! - 外部变换栈的调用契约: `src/transform.rs`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod consts;

mod error;
pub use error::{Error, Result};

mod meta;
pub use meta::{BoundingBox, Role, SampleMetadata, SliceSel};

mod source;
pub use source::{subject_id_of, BoundingBoxMap, SourceRow, SourceTable};

mod volume;
pub use volume::{save_identity, MriVolume};

mod container;
pub use container::{DatasetMeta, Hdf5Container};

pub mod dataset;
pub mod prelude;
pub mod transform;
