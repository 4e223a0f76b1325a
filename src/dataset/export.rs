//! 容器 → BIDS 目录布局的反向导出.
//!
//! 输入影像落在 `<out>/<受试者>/anat/`, 标签落在
//! `<out>/derivatives/labels/<受试者>/anat/`, 文件名优先取数据集
//! 属性中记录的来源文件名. 导出文件一律使用单位空间变换头,
//! 这是容器格式的有损限制.

use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::consts::{NS_GT, NS_INPUTS, NS_ROI};
use crate::container::Hdf5Container;
use crate::error::{Error, Result};
use crate::volume::save_identity;

/// 导出结果统计.
#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    /// 实际导出的受试者数.
    pub subjects: usize,

    /// 写出的 nii 文件数.
    pub files: usize,
}

/// 把容器中给定受试者的全部数据集还原为 BIDS 目录布局.
///
/// `out_dir` 必须已存在, 否则立即失败; 容器中不存在的受试者
/// 告警后跳过; 零长度 (缺失) 标签数据集不产生文件.
pub fn hdf5_to_bids<P, Q>(path_hdf5: P, subjects: &[String], out_dir: Q) -> Result<ExportSummary>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let out_dir = out_dir.as_ref();
    if !out_dir.is_dir() {
        return Err(Error::OutputDirMissing(out_dir.to_owned()));
    }
    let container = Hdf5Container::open(path_hdf5.as_ref())?;

    let mut summary = ExportSummary::default();
    for subject in subjects {
        if !container.subject_exists(subject) {
            warn!("容器中不存在受试者 {subject}, 跳过导出");
            continue;
        }

        let anat = out_dir.join(subject).join("anat");
        fs::create_dir_all(&anat)?;
        for token in container.contrasts(subject, NS_INPUTS)? {
            let key = Hdf5Container::path_key(subject, NS_INPUTS, &token);
            let data = container.read_full3(&key)?;
            let fname = export_filename(&container, &key, subject, &token)?;
            save_identity(&data, anat.join(fname))?;
            summary.files += 1;
        }

        let labels = out_dir
            .join("derivatives")
            .join("labels")
            .join(subject)
            .join("anat");
        for ns in [NS_GT, NS_ROI] {
            for token in container.contrasts(subject, ns)? {
                let key = Hdf5Container::path_key(subject, ns, &token);
                if container.dataset_len(&key)? == 0 {
                    continue;
                }
                fs::create_dir_all(&labels)?;
                let data = container.read_full3(&key)?;
                let fname = export_filename(&container, &key, subject, &token)?;
                save_identity(&data, labels.join(fname))?;
                summary.files += 1;
            }
        }
        summary.subjects += 1;
    }
    info!(
        "导出完成: {} 个受试者, {} 个文件 → {}",
        summary.subjects,
        summary.files,
        out_dir.display()
    );
    Ok(summary)
}

/// 导出文件名: 优先取数据集属性里的来源文件名,
/// 属性缺失时退回 `<受试者>_<标记>.nii.gz`.
fn export_filename(
    container: &Hdf5Container,
    key: &str,
    subject: &str,
    token: &str,
) -> Result<String> {
    let meta = container.dataset_meta(key)?;
    Ok(meta
        .filenames
        .first()
        .cloned()
        .unwrap_or_else(|| format!("{subject}_{token}.nii.gz")))
}
