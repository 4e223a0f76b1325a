//! nifti 体数据读写胶水.
//!
//! 打开文件时即把配置的切片轴移到第 0 维, 之后所有切片操作
//! 都沿第 0 维进行, 上层不再关心原始维度顺序.

use std::path::Path;

use ndarray::{Array2, Array3, ArrayView, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::Result;
use crate::Idx3d;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 切片轴 `axis` 对应的维度置换: 切片轴在前, 其余维度按原序倒排.
#[inline]
fn permutation(axis: usize) -> [usize; 3] {
    match axis {
        0 => [0, 2, 1],
        1 => [1, 2, 0],
        2 => [2, 1, 0],
        _ => panic!("切片轴只能取 0, 1, 2, 但得到 `{axis}`"),
    }
}

/// nii 格式 3D MRI 体数据. 体素值以 `f32` 保存, 切片轴已在第 0 维.
#[derive(Debug, Clone)]
pub struct MriVolume {
    header: BoxedHeader,
    data: Array3<f32>,
    slice_axis: usize,
}

impl MriVolume {
    /// 打开 nii 文件并将 `slice_axis` 维移到第 0 维.
    /// `slice_axis` 越界时程序 panic; 文件不可读时返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P, slice_axis: usize) -> Result<Self> {
        let perm = permutation(slice_axis);
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        let data = obj
            .into_volume()
            .into_ndarray::<f32>()?
            .into_dimensionality::<Ix3>()?
            .permuted_axes(perm);

        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };

        Ok(Self {
            header,
            data,
            slice_axis,
        })
    }

    /// 数据形状, 切片轴在前.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let s = self.data.dim();
        (s.0, s.1, s.2)
    }

    /// 切片个数.
    #[inline]
    pub fn len_slices(&self) -> usize {
        self.data.dim().0
    }

    /// 单个切片的形状.
    #[inline]
    pub fn slice_shape(&self) -> (usize, usize) {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 体素分辨率 (毫米), 与 [`Self::shape`] 同序.
    pub fn zooms(&self) -> [f64; 3] {
        let perm = permutation(self.slice_axis);
        [
            self.header.pixdim[1 + perm[0]] as f64,
            self.header.pixdim[1 + perm[1]] as f64,
            self.header.pixdim[1 + perm[2]] as f64,
        ]
    }

    /// 第 `idx` 个切片的拷贝. 越界时 panic.
    #[inline]
    pub fn slice_at(&self, idx: usize) -> Array2<f32> {
        self.data.index_axis(Axis(0), idx).to_owned()
    }

    /// 数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

/// 以单位空间变换保存体数据到 `path`.
///
/// 原始仿射/方向信息在容器中不可恢复, 导出文件一律使用默认头.
/// 这是文档化的有损限制.
pub fn save_identity<P: AsRef<Path>>(data: &Array3<f32>, path: P) -> Result<()> {
    WriterOptions::new(path.as_ref()).write_nifti(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    #[should_panic]
    fn test_bad_axis_panics() {
        permutation(3);
    }

    #[test]
    fn test_open_round_trip_axial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii.gz");

        // (x, y, z) = (4, 3, 2), 体素值 = 线性编号.
        let raw = Array3::from_shape_fn((4, 3, 2), |(x, y, z)| (x * 6 + y * 2 + z) as f32);
        save_identity(&raw, &path).unwrap();

        let vol = MriVolume::open(&path, crate::consts::axis::AXIAL).unwrap();
        // 轴向切片: (z, y, x).
        assert_eq!(vol.shape(), (2, 3, 4));
        assert_eq!(vol.len_slices(), 2);
        assert_eq!(vol.slice_shape(), (3, 4));

        let s0 = vol.slice_at(0);
        assert_eq!(s0[(0, 0)], raw[(0, 0, 0)]);
        assert_eq!(s0[(2, 3)], raw[(3, 2, 0)]);
        let s1 = vol.slice_at(1);
        assert_eq!(s1[(1, 2)], raw[(2, 1, 1)]);
    }

    #[test]
    fn test_open_sagittal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii");

        let raw = Array3::from_shape_fn((2, 3, 4), |(x, y, z)| (x * 12 + y * 4 + z) as f32);
        save_identity(&raw, &path).unwrap();

        let vol = MriVolume::open(&path, crate::consts::axis::SAGITTAL).unwrap();
        // 矢状切片: (x, z, y).
        assert_eq!(vol.shape(), (2, 4, 3));
        assert_eq!(vol.slice_at(1)[(3, 2)], raw[(1, 2, 3)]);
    }
}
