//! 容器上的随机样本访问.
//!
//! [`HdfDataset`] 把容器与索引表装配成按下标取样的数据集:
//! 取样时按 roi → im → gt 顺序走外部变换栈, 元信息沿链传播.
//! 可选的内存驻留把热通道整体读入, 取样时不再触盘.

use log::{debug, warn};
use ndarray::ArrayD;
use rand::Rng;

use crate::consts::{NS_GT, NS_ROI};
use crate::container::Hdf5Container;
use crate::dataset::convert::{convert, ConvertConfig};
use crate::dataset::index::{Cell, SampleIndex};
use crate::dataset::Dim;
use crate::error::{Error, Result};
use crate::meta::{Role, SampleMetadata};
use crate::transform::{update_metadata, TransformStage};

/// 访问层参数.
pub struct AccessConfig<'a> {
    /// 物化参数. 容器文件缺失时据此现场转换.
    pub convert: ConvertConfig<'a>,

    /// 输入模态列, 决定每个样本的输入通道数与顺序.
    pub contrasts: Vec<String>,

    /// 目标标签后缀列.
    pub gt_suffixes: Vec<String>,

    /// ROI 标签后缀列. 取样时只消费首个存在的 ROI 通道.
    pub roi_suffixes: Vec<String>,

    /// 样本维度.
    pub dim: Dim,

    /// 索引表 CSV 缓存路径. 文件存在时优先装载,
    /// 缺失时扫描容器重建并写回.
    pub csv_cache: Option<std::path::PathBuf>,

    /// 清除缺任一输入模态的样本行.
    pub complete: bool,

    /// 构造时即把全部输入模态读入内存.
    pub load_in_ram: bool,

    /// 取样时应用的变换栈. `None` 时为恒等.
    pub transform: Option<&'a dyn TransformStage>,
}

/// 模拟模态缺失的掩码更新策略.
#[derive(Copy, Clone, Debug)]
pub enum UpdateStrategy {
    /// 每行每个输入模态以概率 `p` 置缺; 整行全缺时均匀随机
    /// 复活一个模态, 保证每个样本至少一个输入通道有效.
    Missing {
        /// 置缺概率, 0 到 1.
        p: f64,
    },
}

/// 一次取样的产物. 三个通道组各自带平行的元信息列表.
#[derive(Debug, Clone)]
pub struct Sample {
    /// 输入通道, 与模态列平行. 被掩码置缺的通道为全零.
    pub input: Vec<ArrayD<f32>>,

    /// 真值标签通道, 仅含存在的标签.
    pub gt: Vec<ArrayD<f32>>,

    /// ROI 通道, 至多一个.
    pub roi: Vec<ArrayD<f32>>,

    /// 输入通道元信息.
    pub input_metadata: Vec<SampleMetadata>,

    /// 标签通道元信息.
    pub gt_metadata: Vec<SampleMetadata>,

    /// ROI 通道元信息.
    pub roi_metadata: Vec<SampleMetadata>,
}

/// HDF5 容器上的随机访问数据集.
pub struct HdfDataset<'a> {
    container: Hdf5Container,
    index: SampleIndex,
    contrasts: Vec<String>,
    gt_columns: Vec<String>,
    roi_columns: Vec<String>,
    /// 行 × 输入模态的有效掩码, 1 = 有效.
    mask: Vec<Vec<u8>>,
    /// 模态列 → 是否已整列驻留内存.
    resident: Vec<bool>,
    transform: Option<&'a dyn TransformStage>,
}

impl<'a> HdfDataset<'a> {
    /// 装配数据集. 容器缺失时先行物化 (整体幂等), 随后建表.
    pub fn new(cfg: AccessConfig<'a>) -> Result<Self> {
        if !cfg.convert.path_hdf5.exists() {
            convert(&cfg.convert)?;
        }
        let container = Hdf5Container::open(&cfg.convert.path_hdf5)?;
        let mut index = match &cfg.csv_cache {
            Some(p) if p.is_file() => SampleIndex::load_or_build(
                p,
                &container,
                &cfg.contrasts,
                &cfg.gt_suffixes,
                &cfg.roi_suffixes,
                cfg.dim,
            )?,
            cache => {
                let idx = SampleIndex::build(
                    &container,
                    &cfg.contrasts,
                    &cfg.gt_suffixes,
                    &cfg.roi_suffixes,
                    cfg.dim,
                )?;
                if let Some(p) = cache {
                    idx.save(p)?;
                }
                idx
            }
        };
        if cfg.complete {
            let removed = index.clean(&cfg.contrasts);
            if removed > 0 {
                debug!("清除缺输入模态的样本行 {removed} 个");
            }
        }

        let gt_columns = cfg
            .gt_suffixes
            .iter()
            .map(|s| format!("{NS_GT}/{s}"))
            .collect();
        let roi_columns = cfg
            .roi_suffixes
            .iter()
            .map(|s| format!("{NS_ROI}/{s}"))
            .collect();
        let n_contrasts = cfg.contrasts.len();
        let mask = vec![vec![1u8; n_contrasts]; index.len()];

        let mut ds = Self {
            container,
            index,
            contrasts: cfg.contrasts,
            gt_columns,
            roi_columns,
            mask,
            resident: vec![false; n_contrasts],
            transform: cfg.transform,
        };
        if cfg.load_in_ram {
            let contrasts = ds.contrasts.clone();
            ds.load_into_ram(&contrasts)?;
        }
        Ok(ds)
    }

    /// 样本数.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// 数据集是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// 底层索引表.
    #[inline]
    pub fn index(&self) -> &SampleIndex {
        &self.index
    }

    /// 替换取样变换栈.
    pub fn set_transform(&mut self, transform: Option<&'a dyn TransformStage>) {
        self.transform = transform;
    }

    /// 把给定输入模态列整体读入内存.
    ///
    /// 未知模态告警后跳过; 已驻留的列是空操作, 重复调用安全.
    pub fn load_into_ram(&mut self, columns: &[String]) -> Result<()> {
        for name in columns {
            let Some(k) = self.contrasts.iter().position(|c| c == name) else {
                warn!("未知输入模态 {name}, 不驻留");
                continue;
            };
            if self.resident[k] {
                debug!("模态 {name} 已驻留, 跳过");
                continue;
            }
            let col = self
                .index
                .col_index(name)
                .ok_or_else(|| Error::MissingData(format!("索引表无列 {name}")))?;
            for row in 0..self.index.len() {
                let r = self.index.row(row);
                let Some(path) = r.cells[col].path().map(str::to_owned) else {
                    continue;
                };
                let data = self.container.read_selected(&path, &r.slices)?;
                self.index.promote(row, col, data);
            }
            self.resident[k] = true;
            debug!("模态 {name} 驻留完成");
        }
        Ok(())
    }

    /// 应用掩码更新策略.
    pub fn update<R: Rng + ?Sized>(&mut self, strategy: UpdateStrategy, rng: &mut R) {
        match strategy {
            UpdateStrategy::Missing { p } => {
                let n = self.contrasts.len();
                for row in self.mask.iter_mut() {
                    for m in row.iter_mut() {
                        if rng.gen_bool(p) {
                            *m = 0;
                        }
                    }
                    if n > 0 && row.iter().all(|m| *m == 0) {
                        row[rng.gen_range(0..n)] = 1;
                    }
                }
            }
        }
    }

    /// 读一个通道: 驻留数据直接克隆, 否则按行选择子触盘.
    fn channel(&self, row: usize, col: usize) -> Result<Option<(ArrayD<f32>, SampleMetadata)>> {
        let r = self.index.row(row);
        let (data, path) = match &r.cells[col] {
            Cell::Missing => return Ok(None),
            Cell::Resident { path, data } => (data.clone(), path.clone()),
            Cell::Path(path) => (self.container.read_selected(path, &r.slices)?, path.clone()),
        };
        let mut meta = self.container.dataset_meta(&path)?;
        meta.slice_index = Some(r.slices.clone());
        Ok(Some((data, meta)))
    }

    fn apply_stage(
        &self,
        samples: Vec<ArrayD<f32>>,
        metadata: Vec<SampleMetadata>,
        role: Role,
    ) -> (Vec<ArrayD<f32>>, Vec<SampleMetadata>) {
        match self.transform {
            Some(t) => t.apply(samples, metadata, role),
            None => (samples, metadata),
        }
    }

    /// 取第 `i` 个样本. 变换顺序固定为 roi → im → gt,
    /// 上一阶段产出的裁剪参数传播给下一阶段.
    pub fn get(&self, i: usize) -> Result<Sample> {
        let row_mask = &self.mask[i];

        // ROI: 只消费首个存在的通道.
        let mut roi_samples = Vec::new();
        let mut roi_meta = Vec::new();
        for name in &self.roi_columns {
            let Some(col) = self.index.col_index(name) else {
                continue;
            };
            if let Some((data, meta)) = self.channel(i, col)? {
                roi_samples.push(data);
                roi_meta.push(meta);
                break;
            }
        }
        let (roi, roi_metadata) = self.apply_stage(roi_samples, roi_meta, Role::Roi);

        let missing_mod = row_mask.clone();
        let mut in_samples = Vec::with_capacity(self.contrasts.len());
        let mut in_meta = Vec::with_capacity(self.contrasts.len());
        for (k, name) in self.contrasts.iter().enumerate() {
            let col = self
                .index
                .col_index(name)
                .ok_or_else(|| Error::MissingData(format!("索引表无列 {name}")))?;
            let (mut data, mut meta) = self
                .channel(i, col)?
                .ok_or_else(|| Error::MissingData(format!("样本 {i} 缺输入模态 {name}")))?;
            if row_mask[k] == 0 {
                data.fill(0.0);
            }
            meta.missing_mod = Some(missing_mod.clone());
            in_samples.push(data);
            in_meta.push(meta);
        }
        update_metadata(&roi_metadata, &mut in_meta);
        let (input, input_metadata) = self.apply_stage(in_samples, in_meta, Role::Im);

        let mut gt_samples = Vec::new();
        let mut gt_meta = Vec::new();
        for name in &self.gt_columns {
            let Some(col) = self.index.col_index(name) else {
                continue;
            };
            if let Some((data, meta)) = self.channel(i, col)? {
                gt_samples.push(data);
                gt_meta.push(meta);
            }
        }
        update_metadata(&input_metadata, &mut gt_meta);
        let (gt, gt_metadata) = self.apply_stage(gt_samples, gt_meta, Role::Gt);

        Ok(Sample {
            input,
            gt,
            roi,
            input_metadata,
            gt_metadata,
            roi_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures;
    use crate::meta::SliceSel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn str_vec(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn access_cfg(
        table: &crate::source::SourceTable,
        path: std::path::PathBuf,
        load_in_ram: bool,
    ) -> AccessConfig<'_> {
        AccessConfig {
            convert: fixtures::basic_cfg(table, path),
            contrasts: str_vec(&["T1w", "T2w"]),
            gt_suffixes: str_vec(&["lesion"]),
            roi_suffixes: vec![],
            dim: Dim::D2,
            csv_cache: None,
            complete: true,
            load_in_ram,
            transform: None,
        }
    }

    #[test]
    fn test_end_to_end_2d_expansion() {
        fixtures::init_test_logger();
        let dir = tempfile::tempdir().unwrap();
        let table = fixtures::synthetic_bids(dir.path());
        // 容器缺失: 构造时现场物化.
        let ds = HdfDataset::new(access_cfg(&table, dir.path().join("d.h5"), false)).unwrap();

        // 2D 展开: 行数 = 保留切片总数 (5 + 4).
        assert_eq!(ds.len(), 9);

        let s = ds.get(0).unwrap();
        assert_eq!(s.input.len(), 2);
        assert_eq!(s.gt.len(), 1);
        assert!(s.roi.is_empty());
        assert_eq!(s.input[0].shape(), &[3, 3]);

        // sub-01 T1w 第 0 切片的角点体素 = 1.0 (线性编号).
        assert_eq!(s.input[0][[0, 0]], 1.0);

        let m = &s.input_metadata[0];
        assert_eq!(m.contrast.as_deref(), Some("T1w"));
        assert_eq!(m.data_type.as_deref(), Some("im"));
        assert_eq!(m.slice_index, Some(SliceSel::One(0)));
        assert_eq!(m.missing_mod, Some(vec![1, 1]));
        assert_eq!(s.gt_metadata[0].contrast.as_deref(), Some("lesion"));

        // 标签体素经量化后仍是 0/1.
        assert!(s.gt[0].iter().all(|v| *v == 0.0 || *v == 1.0));
    }

    #[test]
    fn test_load_into_ram_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let table = fixtures::synthetic_bids(dir.path());
        let mut ds =
            HdfDataset::new(access_cfg(&table, dir.path().join("d.h5"), true)).unwrap();

        // 全部输入单元格已驻留.
        let t1 = ds.index().col_index("T1w").unwrap();
        assert!(ds
            .index()
            .rows()
            .iter()
            .all(|r| matches!(r.cells[t1], Cell::Resident { .. })));

        let before = ds.get(3).unwrap();
        // 重复驻留与未知模态都是安全的空操作.
        ds.load_into_ram(&str_vec(&["T1w", "FLAIR"])).unwrap();
        let after = ds.get(3).unwrap();
        assert_eq!(before.input[0], after.input[0]);
        assert_eq!(before.input[1], after.input[1]);
    }

    #[test]
    fn test_update_missing_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let table = fixtures::synthetic_bids(dir.path());
        let mut ds =
            HdfDataset::new(access_cfg(&table, dir.path().join("d.h5"), false)).unwrap();
        let mut rng = StdRng::seed_from_u64(11);

        // p = 0: 掩码不变, 没有通道被置零.
        ds.update(UpdateStrategy::Missing { p: 0.0 }, &mut rng);
        let s = ds.get(0).unwrap();
        assert!(s.input.iter().all(|a| a.iter().any(|v| *v != 0.0)));

        // p = 1: 全部置缺后每行恰好复活一个模态.
        ds.update(UpdateStrategy::Missing { p: 1.0 }, &mut rng);
        for i in 0..ds.len() {
            let s = ds.get(i).unwrap();
            let alive = s
                .input
                .iter()
                .filter(|a| a.iter().any(|v| *v != 0.0))
                .count();
            assert_eq!(alive, 1, "样本 {i} 应恰好保留一个输入通道");
            let mm = s.input_metadata[0].missing_mod.as_ref().unwrap();
            assert_eq!(mm.iter().map(|m| *m as usize).sum::<usize>(), 1);
        }
    }

    #[test]
    fn test_csv_cache_written_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let table = fixtures::synthetic_bids(dir.path());
        let cache = dir.path().join("index.csv");

        let mut cfg = access_cfg(&table, dir.path().join("d.h5"), false);
        cfg.csv_cache = Some(cache.clone());
        let ds = HdfDataset::new(cfg).unwrap();
        assert!(cache.is_file());
        assert_eq!(ds.len(), 9);

        // 第二次构造走缓存, 结果一致.
        let mut cfg = access_cfg(&table, dir.path().join("d.h5"), false);
        cfg.csv_cache = Some(cache);
        let ds2 = HdfDataset::new(cfg).unwrap();
        assert_eq!(ds2.len(), ds.len());
        assert_eq!(ds2.index().columns(), ds.index().columns());
    }

    #[test]
    fn test_3d_rows_select_full_stack() {
        let dir = tempfile::tempdir().unwrap();
        let table = fixtures::synthetic_bids(dir.path());
        let mut cfg = access_cfg(&table, dir.path().join("d.h5"), false);
        cfg.dim = Dim::D3;
        let ds = HdfDataset::new(cfg).unwrap();

        assert_eq!(ds.len(), 2);
        let s = ds.get(0).unwrap();
        assert_eq!(s.input[0].shape(), &[5, 3, 3]);
        assert_eq!(s.gt[0].shape(), &[5, 3, 3]);
        assert_eq!(
            s.input_metadata[0].slice_index,
            Some(SliceSel::All(vec![0, 1, 2, 3, 4]))
        );
    }
}
