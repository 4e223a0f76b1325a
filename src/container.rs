//! HDF5 随机访问容器.
//!
//! 布局: 每个受试者一个顶层组, 组内 `inputs/gt/roi` 三个命名空间,
//! 每个命名空间下按标记 (模态名或标签后缀) 存放一个数据集.
//! gt/roi 缺失以首维长度为 0 的数据集表达, 而不是数据集缺席,
//! 下游据此按长度分支, 不必捕获查找失败.

use std::path::Path;
use std::str::FromStr;

use hdf5::types::VarLenUnicode;
use hdf5::{File, Group, Location};
use ndarray::{Array3, ArrayD, ArrayView1, Axis, Ix3};

use crate::consts::{NS_GT, NS_INPUTS};
use crate::error::{Error, Result};
use crate::meta::{BoundingBox, SampleMetadata, SliceSel};

/// 数据集级元信息, 作为属性附着在容器数据集上.
#[derive(Debug, Clone, Default)]
pub struct DatasetMeta {
    /// 角色标签 (`im` / `gt` / `roi`).
    pub data_type: String,

    /// 体素分辨率 (毫米), 切片轴在前.
    pub zooms: [f64; 3],

    /// 数据集形状, 切片轴在前.
    pub data_shape: [usize; 3],

    /// 可选的裁剪包围盒.
    pub bounding_box: Option<BoundingBox>,

    /// 来源文件名列表.
    pub filenames: Vec<String>,
}

/// 命名空间对应的文件名属性名.
#[inline]
fn filenames_attr(ns: &str) -> &'static str {
    match ns {
        NS_INPUTS => "input_filenames",
        NS_GT => "gt_filenames",
        _ => "roi_filename",
    }
}

fn to_vlu(s: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(s).map_err(|e| Error::InvalidAttr(format!("`{s}`: {e}")))
}

fn write_str_list(loc: &Location, name: &str, values: &[String]) -> Result<()> {
    let encoded: Vec<VarLenUnicode> = values
        .iter()
        .map(|v| to_vlu(v))
        .collect::<Result<Vec<_>>>()?;
    let attr = loc
        .new_attr::<VarLenUnicode>()
        .shape((encoded.len(),))
        .create(name)?;
    if !encoded.is_empty() {
        attr.write(ArrayView1::from(encoded.as_slice()))?;
    }
    Ok(())
}

/// 属性缺席时返回空列表.
fn read_str_list(loc: &Location, name: &str) -> Result<Vec<String>> {
    match loc.attr(name) {
        Ok(attr) => Ok(attr
            .read_raw::<VarLenUnicode>()?
            .iter()
            .map(|v| v.to_string())
            .collect()),
        Err(_) => Ok(vec![]),
    }
}

fn write_str_scalar(loc: &Location, name: &str, value: &str) -> Result<()> {
    let value = to_vlu(value)?;
    loc.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn read_str_scalar(loc: &Location, name: &str) -> Option<String> {
    let attr = loc.attr(name).ok()?;
    let value: VarLenUnicode = attr.read_scalar().ok()?;
    Some(value.to_string())
}

fn write_u64_list(loc: &Location, name: &str, values: &[u64]) -> Result<()> {
    let attr = loc.new_attr::<u64>().shape((values.len(),)).create(name)?;
    if !values.is_empty() {
        attr.write(ArrayView1::from(values))?;
    }
    Ok(())
}

/// HDF5 随机访问容器句柄.
///
/// 转换期以独占写模式持有; 访问期以只读模式重新打开.
/// 单句柄的所有写操作串行发生, 本结构不支持并发写者.
pub struct Hdf5Container {
    file: File,
}

impl Hdf5Container {
    /// 新建容器文件. 已存在的同名文件会被截断, 调用方需先自行检查
    /// (转换器的幂等跳过发生在更上层).
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: File::create(path.as_ref())?,
        })
    }

    /// 以只读模式打开既有容器. 文件缺失或损坏时为致命错误.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: File::open(path.as_ref())?,
        })
    }

    /// 数据集的容器路径键 `"<subject>/<namespace>/<token>"`.
    #[inline]
    pub fn path_key(subject: &str, ns: &str, token: &str) -> String {
        format!("{subject}/{ns}/{token}")
    }

    /// 写入顶层属性. 每个容器只在创建后调用一次.
    pub fn set_root_attrs(
        &self,
        patients: &[String],
        slice_axis: usize,
        filter_names: &[String],
        metadata_choice: &str,
    ) -> Result<()> {
        write_str_list(&self.file, "patients_id", patients)?;
        self.file
            .new_attr::<i64>()
            .create("slice_axis")?
            .write_scalar(&(slice_axis as i64))?;
        write_str_list(&self.file, "slice_filter_fn", filter_names)?;
        write_str_scalar(&self.file, "metadata_choice", metadata_choice)?;
        Ok(())
    }

    /// 容器内全部受试者标识.
    pub fn patients(&self) -> Result<Vec<String>> {
        read_str_list(&self.file, "patients_id")
    }

    /// 转换时使用的切片轴.
    pub fn slice_axis(&self) -> Result<usize> {
        Ok(self.file.attr("slice_axis")?.read_scalar::<i64>()? as usize)
    }

    /// 激活的切片谓词名.
    pub fn slice_filter_names(&self) -> Result<Vec<String>> {
        read_str_list(&self.file, "slice_filter_fn")
    }

    /// 元信息选择模式.
    pub fn metadata_choice(&self) -> Option<String> {
        read_str_scalar(&self.file, "metadata_choice")
    }

    /// 受试者组是否存在.
    #[inline]
    pub fn subject_exists(&self, subject: &str) -> bool {
        self.file.link_exists(subject)
    }

    /// `(subject, ns, token)` 数据集是否已写入.
    pub fn dataset_exists(&self, subject: &str, ns: &str, token: &str) -> bool {
        self.file.link_exists(subject)
            && self.file.link_exists(&format!("{subject}/{ns}"))
            && self.file.link_exists(&Self::path_key(subject, ns, token))
    }

    /// 取或建 `path` 处的组. `path` 的各级由 `/` 分隔且非空.
    fn ensure_group(&self, path: &str) -> Result<Group> {
        let mut parts = path.split('/');
        let first = parts.next().expect("组路径非空");
        let mut cur = if self.file.link_exists(first) {
            self.file.group(first)?
        } else {
            self.file.create_group(first)?
        };
        for part in parts {
            cur = if cur.link_exists(part) {
                cur.group(part)?
            } else {
                cur.create_group(part)?
            };
        }
        Ok(cur)
    }

    /// 写入一个体数据集及其元信息属性.
    ///
    /// 重复写策略为 skip-if-exists: 该键已有数据集时不做任何修改并返回
    /// `Ok(false)`; 成功写入返回 `Ok(true)`.
    pub fn write_volume(
        &self,
        subject: &str,
        ns: &str,
        token: &str,
        data: &Array3<f32>,
        meta: &DatasetMeta,
    ) -> Result<bool> {
        if self.dataset_exists(subject, ns, token) {
            return Ok(false);
        }
        let grp = self.ensure_group(&format!("{subject}/{ns}"))?;
        let ds = if data.is_empty() {
            // 零长度数据集: 形状保留, 首维为 0.
            grp.new_dataset::<f32>().shape(data.dim()).create(token)?
        } else {
            grp.new_dataset_builder().with_data(data).create(token)?
        };

        write_str_scalar(&ds, "data_type", &meta.data_type)?;
        let zooms = ds.new_attr::<f64>().shape((3,)).create("zooms")?;
        zooms.write(ArrayView1::from(&meta.zooms[..]))?;
        let shape_u64: Vec<u64> = meta.data_shape.iter().map(|v| *v as u64).collect();
        write_u64_list(&ds, "data_shape", &shape_u64)?;
        if let Some(bb) = &meta.bounding_box {
            let attr = ds.new_attr::<i64>().shape((6,)).create("bounding_box")?;
            attr.write(ArrayView1::from(&bb[..]))?;
        }
        write_str_list(&ds, filenames_attr(ns), &meta.filenames)?;
        Ok(true)
    }

    /// 写入命名空间级 `contrast` 属性 (去重后的标记列表).
    ///
    /// 属性已存在时跳过并告警: 安全 API 不支持属性改写, 调用方应在
    /// 聚合完成后一次性写入.
    pub fn set_contrasts(&self, subject: &str, ns: &str, tokens: &[String]) -> Result<()> {
        let grp = self.ensure_group(&format!("{subject}/{ns}"))?;
        if grp.attr("contrast").is_ok() {
            log::warn!("{subject}/{ns} 的 contrast 属性已存在, 跳过重写");
            return Ok(());
        }
        write_str_list(&grp, "contrast", tokens)
    }

    /// 写入受试者组级 `slices` 属性 (保留切片下标, 升序去重).
    pub fn set_slices(&self, subject: &str, slices: &[usize]) -> Result<()> {
        let grp = self.ensure_group(subject)?;
        if grp.attr("slices").is_ok() {
            log::warn!("{subject} 的 slices 属性已存在, 跳过重写");
            return Ok(());
        }
        let v: Vec<u64> = slices.iter().map(|s| *s as u64).collect();
        write_u64_list(&grp, "slices", &v)
    }

    /// 读取命名空间的标记列表. 组或属性缺席时为空列表.
    pub fn contrasts(&self, subject: &str, ns: &str) -> Result<Vec<String>> {
        let path = format!("{subject}/{ns}");
        if !self.file.link_exists(subject) || !self.file.link_exists(&path) {
            return Ok(vec![]);
        }
        let grp = self.file.group(&path)?;
        read_str_list(&grp, "contrast")
    }

    /// 读取受试者组的保留切片下标. 组或属性缺席时为空列表.
    pub fn slices(&self, subject: &str) -> Result<Vec<usize>> {
        if !self.file.link_exists(subject) {
            return Ok(vec![]);
        }
        let grp = self.file.group(subject)?;
        match grp.attr("slices") {
            Ok(attr) => Ok(attr.read_raw::<u64>()?.iter().map(|v| *v as usize).collect()),
            Err(_) => Ok(vec![]),
        }
    }

    /// 整体读取 `key` 处的数据集.
    pub fn read_full(&self, key: &str) -> Result<ArrayD<f32>> {
        Ok(self.file.dataset(key)?.read_dyn::<f32>()?)
    }

    /// 整体读取并要求三维形状.
    pub fn read_full3(&self, key: &str) -> Result<Array3<f32>> {
        Ok(self.read_full(key)?.into_dimensionality::<Ix3>()?)
    }

    /// 按切片选择子读取 `key` 处数据集的首维子集.
    ///
    /// 零长度数据集 (gt/roi 缺失) 原样返回, 调用方按长度分支.
    pub fn read_selected(&self, key: &str, sel: &SliceSel) -> Result<ArrayD<f32>> {
        let arr = self.read_full(key)?;
        if arr.shape()[0] == 0 {
            return Ok(arr);
        }
        match sel {
            SliceSel::All(idx) => Ok(arr.select(Axis(0), idx)),
            SliceSel::One(i) => Ok(arr.index_axis(Axis(0), *i).to_owned()),
        }
    }

    /// `key` 处数据集的首维长度.
    pub fn dataset_len(&self, key: &str) -> Result<usize> {
        Ok(self.file.dataset(key)?.shape().first().copied().unwrap_or(0))
    }

    /// 读取数据集属性并装配为样本元信息.
    pub fn dataset_meta(&self, key: &str) -> Result<SampleMetadata> {
        let ds = self.file.dataset(key)?;
        let mut parts = key.split('/');
        let _subject = parts.next();
        let ns = parts.next().unwrap_or_default().to_owned();
        let token = parts.next().unwrap_or_default().to_owned();

        let mut m = SampleMetadata {
            contrast: Some(token),
            data_type: read_str_scalar(&ds, "data_type"),
            filenames: read_str_list(&ds, filenames_attr(&ns))?,
            ..SampleMetadata::default()
        };
        if let Ok(attr) = ds.attr("zooms") {
            let z = attr.read_raw::<f64>()?;
            if z.len() == 3 {
                m.zooms = Some([z[0], z[1], z[2]]);
            }
        }
        if let Ok(attr) = ds.attr("data_shape") {
            let s = attr.read_raw::<u64>()?;
            if s.len() == 3 {
                m.data_shape = Some([s[0] as usize, s[1] as usize, s[2] as usize]);
            }
        }
        if let Ok(attr) = ds.attr("bounding_box") {
            let b = attr.read_raw::<i64>()?;
            if b.len() == 6 {
                m.bounding_box = Some([b[0], b[1], b[2], b[3], b[4], b[5]]);
            }
        }
        Ok(m)
    }
}
