//! 通用常量.

/// 切片轴编号. 与 nifti 体数据的空间维度对应.
pub mod axis {
    /// 矢状面: 沿第 0 维切片.
    pub const SAGITTAL: usize = 0;

    /// 冠状面: 沿第 1 维切片.
    pub const CORONAL: usize = 1;

    /// 横断面: 沿第 2 维切片.
    pub const AXIAL: usize = 2;
}

/// 容器中每个受试者组的输入命名空间.
pub const NS_INPUTS: &str = "inputs";

/// 容器中每个受试者组的真值标签命名空间.
pub const NS_GT: &str = "gt";

/// 容器中每个受试者组的 ROI 掩膜命名空间.
pub const NS_ROI: &str = "roi";

/// 三个命名空间, 按装配顺序排列.
pub const NAMESPACES: [&str; 3] = [NS_INPUTS, NS_GT, NS_ROI];

/// 索引表 csv 持久化时的缺失哨兵.
///
/// 仅存在于磁盘表示中. 内存中的缺失状态由
/// [`Cell::Missing`](crate::dataset::Cell) 显式表达.
pub const MISSING_SENTINEL: &str = "None";

/// `mri_params` 元信息完备模式所要求的采集参数字段.
///
/// 前三项必须能解析为数值, 第四项为厂商字符串.
pub const MRI_PARAMS: [&str; 4] = ["FlipAngle", "RepetitionTime", "EchoTime", "Manufacturer"];

/// `MRI_PARAMS` 中必须为数值的字段个数 (前缀长度).
pub const MRI_NUMERIC_PARAMS: usize = 3;
