//! 源目录 → HDF5 容器的一次性物化.
//!
//! 转换流程分两个阶段: 先按确定性顺序筛选受试者文件 (模态均衡、
//! 标签齐备、元信息齐备), 再逐受试者切片、变换、聚合并写入容器.
//! 同一受试者的全部数据集与属性在内存中聚合完成后一次性落盘,
//! 避免对已写属性的改写.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use itertools::Itertools;
use log::{debug, info, warn};
use ndarray::{Array2, Array3, ArrayD, Axis, Ix2};

use crate::consts::{MRI_NUMERIC_PARAMS, MRI_PARAMS, NS_GT, NS_INPUTS, NS_ROI};
use crate::container::{DatasetMeta, Hdf5Container};
use crate::error::{Error, Result};
use crate::meta::{Role, SampleMetadata, SliceSel};
use crate::source::{BoundingBoxMap, SourceRow, SourceTable};
use crate::transform::{update_metadata, Identity, SliceFilter, TransformStage};
use crate::volume::MriVolume;

/// 容器顶层 `metadata_choice` 属性的取值.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum MetadataChoice {
    /// 不附加筛选条件.
    #[default]
    Disabled,

    /// 仅记录模态信息 (无额外筛选).
    Contrasts,

    /// 要求每个输入文件带全部 MRI 采集参数, 且数值参数可解析.
    MriParams,
}

impl MetadataChoice {
    /// 写入容器顶层属性的字符串形式.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "none",
            Self::Contrasts => "contrasts",
            Self::MriParams => "mri_params",
        }
    }
}

/// 转换参数.
pub struct ConvertConfig<'a> {
    /// 源目录描述表.
    pub source: &'a SourceTable,

    /// 待转换的输入文件名列表 (内部会排序以保证确定性).
    pub subject_files: Vec<String>,

    /// 目标标签后缀, 按优先级排列.
    pub target_suffixes: Vec<String>,

    /// ROI 标签后缀. 给定时, 缺 ROI 的受试者整体被拒绝.
    pub roi_suffix: Option<String>,

    /// 模态均衡阈值: 模态后缀 → 接纳比例上限 (0 到 1).
    /// 未列出的模态不受限.
    pub contrast_balance: BTreeMap<String, f64>,

    /// 切片轴, 见 [`crate::consts::axis`].
    pub slice_axis: usize,

    /// 元信息筛选模式.
    pub metadata_choice: MetadataChoice,

    /// 切片保留谓词. `None` 时全部切片保留.
    pub slice_filter: Option<SliceFilter>,

    /// 物化前的预处理变换栈. `None` 时为恒等.
    pub prepro: Option<&'a dyn TransformStage>,

    /// 外部包围盒提供者的输出.
    pub bounding_boxes: Option<&'a BoundingBoxMap>,

    /// 容器输出路径.
    pub path_hdf5: PathBuf,
}

/// 转换结果统计.
#[derive(Debug, Clone, Default)]
pub struct ConvertSummary {
    /// 目标容器已存在, 本次未做任何写入.
    pub already_existed: bool,

    /// 实际写入的受试者组数.
    pub subjects: usize,

    /// 实际写入的数据集数 (含零长度数据集).
    pub datasets_written: usize,
}

/// 通过筛选的一个 (输入文件, 标签文件集) 配对.
struct FilenamePair {
    subject_id: String,
    contrast: String,
    input_path: PathBuf,
    input_filename: String,
    /// 与 `target_suffixes` 平行, 缺失项为 `None`.
    targets: Vec<Option<(PathBuf, String)>>,
    roi: Option<(PathBuf, String)>,
}

/// 单个配对切片聚合后的产物.
struct PairOutput {
    input: (String, Array3<f32>, DatasetMeta),
    /// 与 `target_suffixes` 平行, 缺失后缀为零长度数据集.
    gts: Vec<(String, Array3<f32>, DatasetMeta)>,
    roi: Option<(String, Array3<f32>, DatasetMeta)>,
    useful: Vec<usize>,
}

/// 将 gt/roi 体素量化到 256 级再归一化, 消除插值引入的毛刺.
fn quantize(a: &ArrayD<f32>) -> ArrayD<f32> {
    a.mapv(|v| ((v * 255.0) as u8) as f32 / 255.0)
}

fn stack3(slices: &[Array2<f32>]) -> Result<Array3<f32>> {
    let views: Vec<_> = slices.iter().map(|a| a.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

struct ConvertSession<'a> {
    cfg: &'a ConvertConfig<'a>,
    /// 模态后缀 → 候选文件总数, 仅含受均衡约束的模态.
    totals: BTreeMap<String, usize>,
    /// 模态后缀 → 已见文件数.
    counts: BTreeMap<String, usize>,
    pairs: Vec<FilenamePair>,
}

impl<'a> ConvertSession<'a> {
    fn new(cfg: &'a ConvertConfig<'a>) -> Self {
        let totals = cfg
            .contrast_balance
            .keys()
            .map(|ct| (ct.clone(), cfg.source.count_suffix(ct, &cfg.subject_files)))
            .collect();
        Self {
            cfg,
            totals,
            counts: BTreeMap::new(),
            pairs: Vec::new(),
        }
    }

    /// 模态均衡: 每见到一个受限模态文件计数一次, 累计接纳比例
    /// 超过阈值后该模态的后续文件被拒绝.
    fn contrast_over_threshold(&mut self, contrast: &str) -> bool {
        let Some(&threshold) = self.cfg.contrast_balance.get(contrast) else {
            return false;
        };
        let count = self.counts.entry(contrast.to_owned()).or_insert(0);
        *count += 1;
        let total = self.totals.get(contrast).copied().unwrap_or(0);
        total == 0 || (*count as f64 / total as f64) > threshold
    }

    /// 在受试者的衍生文件中按后缀匹配目标标签与 ROI.
    fn find_derivatives(
        &self,
        subject_id: &str,
    ) -> (Vec<Option<(PathBuf, String)>>, Option<(PathBuf, String)>) {
        let mut targets = vec![None; self.cfg.target_suffixes.len()];
        let mut roi = None;
        for row in self.cfg.source.derivatives_of(subject_id) {
            for (i, suffix) in self.cfg.target_suffixes.iter().enumerate() {
                if targets[i].is_none() && row.filename.contains(suffix.as_str()) {
                    targets[i] = Some((row.path.clone(), row.filename.clone()));
                }
            }
            if let Some(rs) = &self.cfg.roi_suffix {
                if roi.is_none() && row.filename.contains(rs.as_str()) {
                    roi = Some((row.path.clone(), row.filename.clone()));
                }
            }
        }
        (targets, roi)
    }

    /// MRI 参数齐备性: 每个参数必须存在, 数值参数必须可解析.
    fn mri_params_ok(&self, row: &SourceRow) -> bool {
        if self.cfg.metadata_choice != MetadataChoice::MriParams {
            return true;
        }
        for (i, key) in MRI_PARAMS.iter().enumerate() {
            match row.metadata.get(*key) {
                None => return false,
                Some(v) if i < MRI_NUMERIC_PARAMS && v.parse::<f64>().is_err() => return false,
                Some(_) => {}
            }
        }
        true
    }

    /// 对单个输入文件完成全部接纳检查, 通过则登记配对.
    fn process_file(&mut self, filename: &str) {
        let Some(row) = self.cfg.source.row_by_filename(filename) else {
            warn!("源表中找不到文件 {filename}, 跳过");
            return;
        };
        let contrast = row.suffix.clone();
        if self.contrast_over_threshold(&contrast) {
            info!("模态均衡拒绝 {filename} (模态 {contrast})");
            return;
        }
        let subject_id = crate::source::subject_id_of(filename).to_owned();
        let (targets, roi) = self.find_derivatives(&subject_id);
        if targets.iter().all(Option::is_none) {
            info!("{filename} 无目标标签, 跳过");
            return;
        }
        if self.cfg.roi_suffix.is_some() && roi.is_none() {
            info!("{filename} 缺 ROI 标签, 跳过");
            return;
        }
        if !self.mri_params_ok(row) {
            warn!("{filename} 的 MRI 采集参数不齐备, 跳过");
            return;
        }
        self.pairs.push(FilenamePair {
            subject_id,
            contrast,
            input_path: row.path.clone(),
            input_filename: filename.to_owned(),
            targets,
            roi,
        });
    }

    /// 切片、变换并聚合一个配对. 体数据形状不一致等可恢复问题
    /// 返回 `Ok(None)`, 由调用方跳过.
    fn slice_pair(&self, pair: &FilenamePair) -> Result<Option<PairOutput>> {
        let input_vol = MriVolume::open(&pair.input_path, self.cfg.slice_axis)?;
        let shape = input_vol.shape();

        let mut target_vols: Vec<Option<(MriVolume, String)>> = Vec::new();
        for t in &pair.targets {
            match t {
                Some((path, fname)) => {
                    let vol = MriVolume::open(path, self.cfg.slice_axis)?;
                    if vol.shape() != shape {
                        warn!(
                            "{fname} 的形状与输入 {} 不一致, 跳过该受试者文件",
                            pair.input_filename
                        );
                        return Ok(None);
                    }
                    target_vols.push(Some((vol, fname.clone())));
                }
                None => target_vols.push(None),
            }
        }
        let roi_vol = match &pair.roi {
            Some((path, fname)) => {
                let vol = MriVolume::open(path, self.cfg.slice_axis)?;
                if vol.shape() != shape {
                    warn!("ROI {fname} 的形状与输入不一致, 跳过该受试者文件");
                    return Ok(None);
                }
                Some((vol, fname.clone()))
            }
            None => None,
        };

        let bounding_box = self
            .cfg
            .bounding_boxes
            .and_then(|m| m.get(&pair.input_path))
            .and_then(|v| v.first())
            .copied();
        let identity = Identity;
        let stage: &dyn TransformStage = self.cfg.prepro.unwrap_or(&identity);
        let base_meta = |contrast: &str, role: Role, idx: usize| {
            let mut m = SampleMetadata::with_contrast(contrast, role);
            m.bounding_box = bounding_box;
            m.slice_index = Some(SliceSel::One(idx));
            m
        };

        let mut input_acc: Vec<Array2<f32>> = Vec::new();
        let mut gt_accs: Vec<Vec<Array2<f32>>> =
            vec![Vec::new(); self.cfg.target_suffixes.len()];
        let mut roi_acc: Vec<Array2<f32>> = Vec::new();
        let mut useful: Vec<usize> = Vec::new();

        for idx in 0..input_vol.len_slices() {
            // 固定变换顺序 roi → im → gt, 裁剪参数沿链传播.
            let (roi_s, roi_m) = match (&roi_vol, &self.cfg.roi_suffix) {
                (Some((vol, _)), Some(rs)) => stage.apply(
                    vec![vol.slice_at(idx).into_dyn()],
                    vec![base_meta(rs, Role::Roi, idx)],
                    Role::Roi,
                ),
                _ => (vec![], vec![]),
            };

            let mut im_meta = vec![base_meta(&pair.contrast, Role::Im, idx)];
            update_metadata(&roi_m, &mut im_meta);
            let (im_s, im_m) =
                stage.apply(vec![input_vol.slice_at(idx).into_dyn()], im_meta, Role::Im);

            let mut gt_samples = Vec::new();
            let mut gt_meta = Vec::new();
            let mut present = Vec::new();
            for (i, tv) in target_vols.iter().enumerate() {
                if let Some((vol, _)) = tv {
                    gt_samples.push(vol.slice_at(idx).into_dyn());
                    gt_meta.push(base_meta(&self.cfg.target_suffixes[i], Role::Gt, idx));
                    present.push(i);
                }
            }
            update_metadata(&im_m, &mut gt_meta);
            let (gt_s, _gt_m) = stage.apply(gt_samples, gt_meta, Role::Gt);

            let retained = match &self.cfg.slice_filter {
                Some(filter) => filter.keep(&im_s, &gt_s),
                None => true,
            };
            if retained {
                useful.push(idx);
            }

            // 数据集保存全部切片, 保留谓词只决定 `slices` 集合的成员.
            input_acc.push(im_s[0].clone().into_dimensionality::<Ix2>()?);
            for (k, &tgt) in present.iter().enumerate() {
                gt_accs[tgt].push(quantize(&gt_s[k]).into_dimensionality::<Ix2>()?);
            }
            if let Some(s) = roi_s.first() {
                roi_acc.push(quantize(s).into_dimensionality::<Ix2>()?);
            }
        }

        if input_acc.is_empty() {
            warn!("{} 不含任何切片, 跳过", pair.input_filename);
            return Ok(None);
        }

        let zooms = input_vol.zooms();
        let (h, w) = (input_acc[0].dim().0, input_acc[0].dim().1);
        let meta_of = |role: Role, dims: [usize; 3], filenames: Vec<String>| DatasetMeta {
            data_type: role.as_str().to_owned(),
            zooms,
            data_shape: dims,
            bounding_box,
            filenames,
        };

        let input = stack3(&input_acc)?;
        let input_meta = meta_of(
            Role::Im,
            [input.dim().0, h, w],
            vec![pair.input_filename.clone()],
        );

        let mut gts = Vec::new();
        for (i, suffix) in self.cfg.target_suffixes.iter().enumerate() {
            let (arr, filenames) = match &target_vols[i] {
                Some((_, fname)) => (stack3(&gt_accs[i])?, vec![fname.clone()]),
                // 缺失标签: 零长度数据集.
                None => (Array3::zeros((0, h, w)), vec![]),
            };
            let m = meta_of(Role::Gt, [arr.dim().0, h, w], filenames);
            gts.push((suffix.clone(), arr, m));
        }

        let roi = match (&roi_vol, &self.cfg.roi_suffix) {
            (Some((_, fname)), Some(rs)) => {
                let arr = stack3(&roi_acc)?;
                let m = meta_of(Role::Roi, [arr.dim().0, h, w], vec![fname.clone()]);
                Some((rs.clone(), arr, m))
            }
            _ => None,
        };

        Ok(Some(PairOutput {
            input: (pair.contrast.clone(), input, input_meta),
            gts,
            roi,
            useful,
        }))
    }
}

/// 把 `out` 中的数据集合并进受试者级聚合, 标记重复者.
fn merge_datasets(
    dst: &mut Vec<(String, Array3<f32>, DatasetMeta)>,
    src: Vec<(String, Array3<f32>, DatasetMeta)>,
) {
    for (token, arr, meta) in src {
        match dst.iter().position(|(t, _, _)| *t == token) {
            // 同一标签后缀在多个模态配对中重现, 以首次为准;
            // 例外是首次为空而本次非空.
            Some(i) if dst[i].1.is_empty() && !arr.is_empty() => dst[i] = (token, arr, meta),
            Some(_) => debug!("标记 {token} 已聚合, 跳过重复"),
            None => dst.push((token, arr, meta)),
        }
    }
}

/// 将源目录物化为 HDF5 容器.
///
/// 整体幂等: 目标文件已存在时不做任何写入, 返回的统计中
/// `already_existed` 为真. 单个受试者文件的读取/形状问题只
/// 影响该文件, 告警后跳过.
pub fn convert(cfg: &ConvertConfig<'_>) -> Result<ConvertSummary> {
    if cfg.path_hdf5.exists() {
        info!("容器 {} 已存在, 跳过转换", cfg.path_hdf5.display());
        return Ok(ConvertSummary {
            already_existed: true,
            ..ConvertSummary::default()
        });
    }
    if let Some(parent) = cfg.path_hdf5.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(Error::OutputDirMissing(parent.to_owned()));
        }
    }

    info!(
        "开始转换 {} 个受试者文件 → {}",
        cfg.subject_files.len(),
        cfg.path_hdf5.display()
    );
    let mut session = ConvertSession::new(cfg);
    for filename in cfg.subject_files.iter().sorted() {
        session.process_file(filename);
    }

    let container = Hdf5Container::create(&cfg.path_hdf5)?;

    let mut by_subject: BTreeMap<String, Vec<&FilenamePair>> = BTreeMap::new();
    for pair in &session.pairs {
        by_subject.entry(pair.subject_id.clone()).or_default().push(pair);
    }

    let mut summary = ConvertSummary::default();
    let mut written: Vec<String> = Vec::new();
    for (subject, pairs) in &by_subject {
        let mut slices: BTreeSet<usize> = BTreeSet::new();
        let mut inputs: Vec<(String, Array3<f32>, DatasetMeta)> = Vec::new();
        let mut gts: Vec<(String, Array3<f32>, DatasetMeta)> = Vec::new();
        let mut rois: Vec<(String, Array3<f32>, DatasetMeta)> = Vec::new();

        for pair in pairs {
            match session.slice_pair(pair) {
                Ok(Some(out)) => {
                    slices.extend(out.useful.iter().copied());
                    merge_datasets(&mut inputs, vec![out.input]);
                    merge_datasets(&mut gts, out.gts);
                    if let Some(roi) = out.roi {
                        merge_datasets(&mut rois, vec![roi]);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("{} 处理失败, 跳过: {e}", pair.input_filename),
            }
        }
        if inputs.is_empty() {
            warn!("受试者 {subject} 无可用输入, 未写入");
            continue;
        }

        for (ns, datasets) in [(NS_INPUTS, &inputs), (NS_GT, &gts), (NS_ROI, &rois)] {
            for (token, arr, meta) in datasets {
                if container.write_volume(subject, ns, token, arr, meta)? {
                    summary.datasets_written += 1;
                } else {
                    warn!("{subject}/{ns}/{token} 已存在, 跳过写入");
                }
            }
            if !datasets.is_empty() {
                let tokens: Vec<String> =
                    datasets.iter().map(|(t, _, _)| t.clone()).collect();
                container.set_contrasts(subject, ns, &tokens)?;
            }
        }
        let sorted: Vec<usize> = slices.iter().copied().collect();
        container.set_slices(subject, &sorted)?;
        summary.subjects += 1;
        written.push(subject.clone());
        debug!("受试者 {subject} 写入完成, 保留切片 {} 个", sorted.len());
    }

    // `patients_id` 只登记实际落盘的受试者组.
    let filter_names = cfg.slice_filter.map(|f| f.names()).unwrap_or_default();
    container.set_root_attrs(
        &written,
        cfg.slice_axis,
        &filter_names,
        cfg.metadata_choice.as_str(),
    )?;

    info!(
        "转换完成: {} 个受试者, {} 个数据集",
        summary.subjects, summary.datasets_written
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::axis;
    use crate::dataset::fixtures;
    use crate::source::SourceRow;
    use crate::volume::save_identity;
    use ndarray::Array3;

    #[test]
    fn test_convert_basic_layout() {
        fixtures::init_test_logger();
        let dir = tempfile::tempdir().unwrap();
        let table = fixtures::synthetic_bids(dir.path());
        let cfg = fixtures::basic_cfg(&table, dir.path().join("d.h5"));

        let summary = convert(&cfg).unwrap();
        assert!(!summary.already_existed);
        assert_eq!(summary.subjects, 2);
        // 每受试者 2 个输入 + 1 个 gt.
        assert_eq!(summary.datasets_written, 6);

        let c = Hdf5Container::open(&cfg.path_hdf5).unwrap();
        assert_eq!(c.patients().unwrap(), vec!["sub-01", "sub-02"]);
        assert_eq!(c.slice_axis().unwrap(), axis::AXIAL);
        assert_eq!(c.metadata_choice().as_deref(), Some("none"));
        assert_eq!(
            c.contrasts("sub-01", NS_INPUTS).unwrap(),
            vec!["T1w", "T2w"]
        );
        assert_eq!(c.contrasts("sub-01", NS_GT).unwrap(), vec!["lesion"]);
        assert!(c.contrasts("sub-01", NS_ROI).unwrap().is_empty());

        // 无过滤时全部切片保留.
        assert_eq!(c.slices("sub-01").unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(c.slices("sub-02").unwrap(), vec![0, 1, 2, 3]);

        let key = Hdf5Container::path_key("sub-01", NS_INPUTS, "T1w");
        assert_eq!(c.read_full3(&key).unwrap().dim(), (5, 3, 3));
        let gt_key = Hdf5Container::path_key("sub-01", NS_GT, "lesion");
        let gt = c.read_full3(&gt_key).unwrap();
        assert_eq!(gt.dim(), (5, 3, 3));
        // 0/1 标签经量化后不变.
        assert!(gt.iter().all(|v| *v == 0.0 || *v == 1.0));

        let m = c.dataset_meta(&gt_key).unwrap();
        assert_eq!(m.data_type.as_deref(), Some("gt"));
        assert_eq!(m.filenames, vec!["sub-01_T1w_lesion.nii.gz"]);
    }

    #[test]
    fn test_convert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let table = fixtures::synthetic_bids(dir.path());
        let cfg = fixtures::basic_cfg(&table, dir.path().join("d.h5"));

        convert(&cfg).unwrap();
        let second = convert(&cfg).unwrap();
        assert!(second.already_existed);
        assert_eq!(second.subjects, 0);

        let c = Hdf5Container::open(&cfg.path_hdf5).unwrap();
        assert_eq!(c.patients().unwrap().len(), 2);
    }

    #[test]
    fn test_contrast_balance_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let table = fixtures::synthetic_bids(dir.path());

        // 阈值 0: 该模态全部被拒.
        let mut cfg = fixtures::basic_cfg(&table, dir.path().join("t0.h5"));
        cfg.contrast_balance.insert("T2w".to_owned(), 0.0);
        convert(&cfg).unwrap();
        let c = Hdf5Container::open(&cfg.path_hdf5).unwrap();
        assert_eq!(c.contrasts("sub-01", NS_INPUTS).unwrap(), vec!["T1w"]);

        // 阈值 1: 全部接纳.
        let mut cfg = fixtures::basic_cfg(&table, dir.path().join("t1.h5"));
        cfg.contrast_balance.insert("T2w".to_owned(), 1.0);
        convert(&cfg).unwrap();
        let c = Hdf5Container::open(&cfg.path_hdf5).unwrap();
        assert_eq!(
            c.contrasts("sub-01", NS_INPUTS).unwrap(),
            vec!["T1w", "T2w"]
        );

        // 阈值 0.5, 每受试者各 1 个 T2w, 共 2 个: 只有第 1 个通过.
        let mut cfg = fixtures::basic_cfg(&table, dir.path().join("th.h5"));
        cfg.contrast_balance.insert("T2w".to_owned(), 0.5);
        convert(&cfg).unwrap();
        let c = Hdf5Container::open(&cfg.path_hdf5).unwrap();
        assert_eq!(
            c.contrasts("sub-01", NS_INPUTS).unwrap(),
            vec!["T1w", "T2w"]
        );
        assert_eq!(c.contrasts("sub-02", NS_INPUTS).unwrap(), vec!["T1w"]);
    }

    #[test]
    fn test_subject_without_target_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let shape = (3, 3, 4);
        for sub in ["sub-01", "sub-02"] {
            fixtures::write_input(&dir.path().join(format!("{sub}_T1w.nii.gz")), shape, 0.0);
        }
        fixtures::write_label(&dir.path().join("sub-01_T1w_lesion.nii.gz"), shape);

        let rows = vec![
            SourceRow::new("sub-01_T1w.nii.gz", "T1w", dir.path().join("sub-01_T1w.nii.gz")),
            SourceRow::new("sub-02_T1w.nii.gz", "T1w", dir.path().join("sub-02_T1w.nii.gz")),
        ];
        let derivs = vec![SourceRow::new(
            "sub-01_T1w_lesion.nii.gz",
            "lesion",
            dir.path().join("sub-01_T1w_lesion.nii.gz"),
        )];
        let table = SourceTable::new(rows, derivs);
        let cfg = fixtures::basic_cfg(&table, dir.path().join("d.h5"));

        let summary = convert(&cfg).unwrap();
        assert_eq!(summary.subjects, 1);
        let c = Hdf5Container::open(&cfg.path_hdf5).unwrap();
        assert_eq!(c.patients().unwrap(), vec!["sub-01"]);
        assert!(!c.subject_exists("sub-02"));
    }

    #[test]
    fn test_slice_filter_drops_empty_masks() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("sub-01_T1w.nii.gz");
        fixtures::write_input(&input_path, (3, 3, 5), 0.0);

        // 标签只在 z >= 2 的切片非零.
        let label_path = dir.path().join("sub-01_T1w_lesion.nii.gz");
        let label =
            Array3::from_shape_fn((3, 3, 5), |(_, _, z)| if z >= 2 { 1.0 } else { 0.0 });
        save_identity(&label, &label_path).unwrap();

        let rows = vec![SourceRow::new("sub-01_T1w.nii.gz", "T1w", &input_path)];
        let derivs = vec![SourceRow::new("sub-01_T1w_lesion.nii.gz", "lesion", &label_path)];
        let table = SourceTable::new(rows, derivs);

        let mut cfg = fixtures::basic_cfg(&table, dir.path().join("d.h5"));
        cfg.slice_filter = Some(SliceFilter {
            filter_empty_input: true,
            filter_empty_mask: true,
        });

        convert(&cfg).unwrap();
        let c = Hdf5Container::open(&cfg.path_hdf5).unwrap();
        assert_eq!(c.slices("sub-01").unwrap(), vec![2, 3, 4]);
        assert_eq!(
            c.slice_filter_names().unwrap(),
            vec!["filter_empty_input", "filter_empty_mask"]
        );

        // 数据集保存全部切片, 过滤只影响 `slices` 集合.
        let key = Hdf5Container::path_key("sub-01", NS_INPUTS, "T1w");
        assert_eq!(c.read_full3(&key).unwrap().dim().0, 5);
        let gt_key = Hdf5Container::path_key("sub-01", NS_GT, "lesion");
        assert_eq!(c.read_full3(&gt_key).unwrap().dim().0, 5);

        // 保留的原切片号可直接寻址数据集首维.
        let kept = c
            .read_selected(&gt_key, &crate::meta::SliceSel::All(vec![2, 3, 4]))
            .unwrap();
        assert_eq!(kept.shape(), &[3, 3, 3]);
        assert!(kept.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_roi_volume_is_quantized() {
        let dir = tempfile::tempdir().unwrap();
        let shape = (3, 3, 4);
        let input_path = dir.path().join("sub-01_T1w.nii.gz");
        fixtures::write_input(&input_path, shape, 0.0);
        let label_path = dir.path().join("sub-01_T1w_lesion.nii.gz");
        fixtures::write_label(&label_path, shape);

        // ROI 掩膜带插值毛刺 (非 1/255 整数倍的值).
        let roi_path = dir.path().join("sub-01_T1w_seg.nii.gz");
        save_identity(&Array3::from_elem(shape, 0.7_f32), &roi_path).unwrap();

        let rows = vec![SourceRow::new("sub-01_T1w.nii.gz", "T1w", &input_path)];
        let derivs = vec![
            SourceRow::new("sub-01_T1w_lesion.nii.gz", "lesion", &label_path),
            SourceRow::new("sub-01_T1w_seg.nii.gz", "seg", &roi_path),
        ];
        let table = SourceTable::new(rows, derivs);

        let mut cfg = fixtures::basic_cfg(&table, dir.path().join("d.h5"));
        cfg.roi_suffix = Some("seg".to_owned());

        convert(&cfg).unwrap();
        let c = Hdf5Container::open(&cfg.path_hdf5).unwrap();
        let roi_key = Hdf5Container::path_key("sub-01", NS_ROI, "seg");
        let roi = c.read_full3(&roi_key).unwrap();
        let expected = ((0.7_f32 * 255.0) as u8) as f32 / 255.0;
        assert!((expected - 0.7).abs() > 1e-3);
        assert!(roi.iter().all(|v| *v == expected));
    }

    #[test]
    fn test_unwritten_subject_left_out_of_patients() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_input(&dir.path().join("sub-01_T1w.nii.gz"), (3, 3, 4), 0.0);
        fixtures::write_label(&dir.path().join("sub-01_T1w_lesion.nii.gz"), (3, 3, 4));
        // sub-02 的标签形状与输入不一致, 切片阶段整体跳过.
        fixtures::write_input(&dir.path().join("sub-02_T1w.nii.gz"), (3, 3, 4), 0.0);
        fixtures::write_label(&dir.path().join("sub-02_T1w_lesion.nii.gz"), (4, 4, 2));

        let rows = (1..=2)
            .map(|i| {
                let fname = format!("sub-0{i}_T1w.nii.gz");
                SourceRow::new(&fname, "T1w", dir.path().join(&fname))
            })
            .collect();
        let derivs = (1..=2)
            .map(|i| {
                let fname = format!("sub-0{i}_T1w_lesion.nii.gz");
                SourceRow::new(&fname, "lesion", dir.path().join(&fname))
            })
            .collect();
        let table = SourceTable::new(rows, derivs);
        let cfg = fixtures::basic_cfg(&table, dir.path().join("d.h5"));

        let summary = convert(&cfg).unwrap();
        assert_eq!(summary.subjects, 1);

        // 接纳检查通过但未落盘的受试者不得出现在 patients_id 中.
        let c = Hdf5Container::open(&cfg.path_hdf5).unwrap();
        assert_eq!(c.patients().unwrap(), vec!["sub-01"]);
        assert!(!c.subject_exists("sub-02"));
    }

    #[test]
    fn test_mri_params_gate() {
        let dir = tempfile::tempdir().unwrap();
        let table = fixtures::synthetic_bids(dir.path());

        // 抹掉 sub-02 所有输入行的 FlipAngle.
        let rows: Vec<SourceRow> = table
            .rows()
            .iter()
            .cloned()
            .map(|mut r| {
                if r.filename.starts_with("sub-02") {
                    r.metadata.remove("FlipAngle");
                }
                r
            })
            .collect();
        let derivs = (1..=2)
            .map(|i| {
                let fname = format!("sub-0{i}_T1w_lesion.nii.gz");
                SourceRow::new(&fname, "lesion", dir.path().join(&fname))
            })
            .collect();
        let table = SourceTable::new(rows, derivs);

        let mut cfg = fixtures::basic_cfg(&table, dir.path().join("d.h5"));
        cfg.metadata_choice = MetadataChoice::MriParams;

        convert(&cfg).unwrap();
        let c = Hdf5Container::open(&cfg.path_hdf5).unwrap();
        assert_eq!(c.patients().unwrap(), vec!["sub-01"]);
        assert_eq!(c.metadata_choice().as_deref(), Some("mri_params"));
    }
}
