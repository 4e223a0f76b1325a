//! 运行时错误.

use std::fmt;
use std::path::PathBuf;

/// crate 级 `Result` 别名.
pub type Result<T> = std::result::Result<T, Error>;

/// 数据集物化、索引与访问的运行时错误.
#[derive(Debug)]
pub enum Error {
    /// 导出目标根目录不存在. 致命错误, 在任何写入发生前中止.
    OutputDirMissing(PathBuf),

    /// HDF5 容器底层错误.
    Hdf5(hdf5::Error),

    /// nifti 文件读写错误.
    Nifti(nifti::NiftiError),

    /// 索引表 csv 读写错误.
    Csv(csv::Error),

    /// 其他底层 I/O 错误.
    Io(std::io::Error),

    /// 数组形状不符合预期.
    Shape(ndarray::ShapeError),

    /// 属性值无法编码为 HDF5 变长字符串.
    InvalidAttr(String),

    /// 索引表文件内容无法解析. 携带出错的单元格原文.
    MalformedCell(String),

    /// 索引行在被请求的列上没有可用数据.
    MissingData(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutputDirMissing(p) => {
                write!(f, "输出目录 {} 不存在, 导出中止", p.display())
            }
            Self::Hdf5(e) => write!(f, "HDF5 容器错误: {e}"),
            Self::Nifti(e) => write!(f, "nifti 读写错误: {e}"),
            Self::Csv(e) => write!(f, "索引表 csv 错误: {e}"),
            Self::Io(e) => write!(f, "I/O 错误: {e}"),
            Self::Shape(e) => write!(f, "数组形状错误: {e}"),
            Self::InvalidAttr(s) => write!(f, "非法属性值: {s}"),
            Self::MalformedCell(s) => write!(f, "索引表单元格无法解析: `{s}`"),
            Self::MissingData(s) => write!(f, "索引行缺少数据: {s}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Hdf5(e) => Some(e),
            Self::Nifti(e) => Some(e),
            Self::Csv(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<hdf5::Error> for Error {
    fn from(e: hdf5::Error) -> Self {
        Self::Hdf5(e)
    }
}

impl From<nifti::NiftiError> for Error {
    fn from(e: nifti::NiftiError) -> Self {
        Self::Nifti(e)
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Shape(e)
    }
}
