//! 源目录数据集描述.
//!
//! 该表由外部目录索引组件产出, 本 crate 只消费:
//! 每行描述一个影像文件 (文件名, 模态后缀, 路径, 任意元信息列),
//! 衍生 (标签) 文件单独列出并按受试者查询.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::meta::BoundingBox;

/// 外部包围盒提供者的输出: 受试者文件路径 → 逐切片包围盒列表.
pub type BoundingBoxMap = BTreeMap<PathBuf, Vec<BoundingBox>>;

/// 源表中的一行, 即一个影像文件.
#[derive(Debug, Clone)]
pub struct SourceRow {
    /// 文件名 (不含目录).
    pub filename: String,

    /// 模态后缀 (输入行) 或标签后缀 (衍生行).
    pub suffix: String,

    /// 文件全路径.
    pub path: PathBuf,

    /// 任意附加元信息列 (如 MRI 采集参数).
    pub metadata: BTreeMap<String, String>,
}

impl SourceRow {
    /// 以最少字段构造一行.
    pub fn new<P: AsRef<Path>>(filename: &str, suffix: &str, path: P) -> Self {
        Self {
            filename: filename.to_owned(),
            suffix: suffix.to_owned(),
            path: path.as_ref().to_owned(),
            metadata: BTreeMap::new(),
        }
    }
}

/// 目录数据集描述表.
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    rows: Vec<SourceRow>,
    derivatives: Vec<SourceRow>,
}

impl SourceTable {
    /// 由输入行与衍生行构造.
    pub fn new(rows: Vec<SourceRow>, derivatives: Vec<SourceRow>) -> Self {
        Self { rows, derivatives }
    }

    /// 所有输入行.
    #[inline]
    pub fn rows(&self) -> &[SourceRow] {
        &self.rows
    }

    /// 按文件名查找输入行.
    pub fn row_by_filename(&self, filename: &str) -> Option<&SourceRow> {
        self.rows.iter().find(|r| r.filename == filename)
    }

    /// 统计后缀完全匹配 `suffix` 的输入行数, 且仅统计 `within` 列出的文件.
    pub fn count_suffix(&self, suffix: &str, within: &[String]) -> usize {
        self.rows
            .iter()
            .filter(|r| r.suffix == suffix && within.iter().any(|f| *f == r.filename))
            .count()
    }

    /// 查询属于 `subject_id` 的衍生 (标签) 文件行.
    pub fn derivatives_of(&self, subject_id: &str) -> Vec<&SourceRow> {
        self.derivatives
            .iter()
            .filter(|r| subject_id_of(&r.filename) == subject_id)
            .collect()
    }
}

/// 从文件名提取受试者标识: 取首个 `.` 之前、再取首个 `_` 之前的前缀.
///
/// 例: `sub-01_T1w.nii.gz` → `sub-01`.
pub fn subject_id_of(filename: &str) -> &str {
    let stem = filename.split('.').next().unwrap_or(filename);
    stem.split('_').next().unwrap_or(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_id_of() {
        assert_eq!(subject_id_of("sub-01_T1w.nii.gz"), "sub-01");
        assert_eq!(subject_id_of("sub-02_acq-x_T2w.nii"), "sub-02");
        assert_eq!(subject_id_of("plain"), "plain");
        assert_eq!(subject_id_of(""), "");
    }

    #[test]
    fn test_table_queries() {
        let rows = vec![
            SourceRow::new("sub-01_T1w.nii.gz", "T1w", "/d/sub-01_T1w.nii.gz"),
            SourceRow::new("sub-01_T2w.nii.gz", "T2w", "/d/sub-01_T2w.nii.gz"),
            SourceRow::new("sub-02_T1w.nii.gz", "T1w", "/d/sub-02_T1w.nii.gz"),
        ];
        let derivs = vec![
            SourceRow::new(
                "sub-01_T1w_lesion.nii.gz",
                "lesion",
                "/d/derivatives/sub-01_T1w_lesion.nii.gz",
            ),
            SourceRow::new(
                "sub-02_T1w_lesion.nii.gz",
                "lesion",
                "/d/derivatives/sub-02_T1w_lesion.nii.gz",
            ),
        ];
        let table = SourceTable::new(rows, derivs);

        assert!(table.row_by_filename("sub-01_T2w.nii.gz").is_some());
        assert!(table.row_by_filename("sub-03_T1w.nii.gz").is_none());

        let all: Vec<String> = table.rows().iter().map(|r| r.filename.clone()).collect();
        assert_eq!(table.count_suffix("T1w", &all), 2);
        assert_eq!(table.count_suffix("T2w", &all[..1]), 0);

        assert_eq!(table.derivatives_of("sub-01").len(), 1);
        assert_eq!(table.derivatives_of("sub-03").len(), 0);
    }
}
