//! 样本与数据集元信息.
//!
//! 元信息是封闭的类型化字段集合, 而不是靠运行时字符串约定的
//! 动态记录: 每个字段要么存在要么缺失, 不存在 "拼错字段名"
//! 这一类错误.

use std::collections::BTreeMap;

/// 变换阶段的角色标签. 决定外部变换栈应用哪个命名子集.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    /// ROI 掩膜. 总是最先变换, 产出的裁剪参数供后续阶段消费.
    Roi,

    /// 输入图像.
    Im,

    /// 真值标签.
    Gt,
}

impl Role {
    /// 角色的字符串标签, 与容器中 `data_type` 属性取值一致.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Roi => "roi",
            Self::Im => "im",
            Self::Gt => "gt",
        }
    }
}

/// 三维包围盒, 依次为每个维度的 `[min, max]` 对.
pub type BoundingBox = [i64; 6];

/// 索引行的切片选择子.
///
/// 寻址容器数据集首维: 要么是保留切片的完整列表 (3D 或逐受试者模式),
/// 要么是单个切片下标 (2D 展开模式).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceSel {
    /// 保留切片下标的完整列表.
    All(Vec<usize>),

    /// 单个切片下标.
    One(usize),
}

impl SliceSel {
    /// 以列表形式给出所有被选中的下标.
    pub fn indices(&self) -> Vec<usize> {
        match self {
            Self::All(v) => v.clone(),
            Self::One(i) => vec![*i],
        }
    }

    /// 选择子涉及的最大下标. 空列表时为 `None`.
    pub fn max(&self) -> Option<usize> {
        match self {
            Self::All(v) => v.iter().copied().max(),
            Self::One(i) => Some(*i),
        }
    }
}

/// 每通道样本元信息. 字段集合封闭, 均为可缺省.
///
/// `crop_params` 在变换链上逐阶段累积: ROI 阶段写入的裁剪参数
/// 会被 [`update_metadata`](crate::transform::update_metadata)
/// 传播给 input 与 gt 阶段.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleMetadata {
    /// 模态标记 (如 `T1w`), 或 gt/roi 数据集的后缀标记.
    pub contrast: Option<String>,

    /// 角色标签, 见 [`Role::as_str`].
    pub data_type: Option<String>,

    /// 体素分辨率, 以毫米为单位, 切片轴在前.
    pub zooms: Option<[f64; 3]>,

    /// 数据集形状, 切片轴在前.
    pub data_shape: Option<[usize; 3]>,

    /// 用于裁剪的包围盒.
    pub bounding_box: Option<BoundingBox>,

    /// 来源文件名列表.
    pub filenames: Vec<String>,

    /// 该样本在容器数据集首维上的切片选择子.
    pub slice_index: Option<SliceSel>,

    /// 缺失模态掩码, 每个输入模态一位 (0 = 本样本丢弃该模态).
    pub missing_mod: Option<Vec<u8>>,

    /// 变换链累积的裁剪参数, 按变换名索引.
    pub crop_params: BTreeMap<String, Vec<i64>>,
}

impl SampleMetadata {
    /// 以模态标记和角色创建其余字段缺省的元信息.
    pub fn with_contrast(contrast: &str, role: Role) -> Self {
        Self {
            contrast: Some(contrast.to_owned()),
            data_type: Some(role.as_str().to_owned()),
            ..Self::default()
        }
    }
}
