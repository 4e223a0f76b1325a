//! 容器上的样本索引表.
//!
//! 每行寻址一个训练样本, 列为输入模态与 `gt/<后缀>`、`roi/<后缀>`
//! 标签通道. 单元格只有三种状态: 缺失、容器路径键、已驻留内存.
//! 表可持久化为 CSV 并原样重建.

use std::path::Path;

use log::{debug, warn};
use ndarray::ArrayD;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::consts::{MISSING_SENTINEL, NS_GT, NS_INPUTS, NS_ROI};
use crate::container::Hdf5Container;
use crate::dataset::Dim;
use crate::error::{Error, Result};
use crate::meta::SliceSel;

/// 索引单元格.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// 该样本无此通道.
    Missing,

    /// 容器数据集路径键, 形如 `sub-01/inputs/T1w`.
    Path(String),

    /// 已驻留内存的通道数据. 路径键保留, 持久化时仍写路径.
    Resident {
        /// 原容器路径键.
        path: String,
        /// 按本行切片选择子读出的数据.
        data: ArrayD<f32>,
    },
}

impl Cell {
    /// 单元格对应的容器路径键. 缺失时为 `None`.
    pub fn path(&self) -> Option<&str> {
        match self {
            Cell::Missing => None,
            Cell::Path(p) | Cell::Resident { path: p, .. } => Some(p),
        }
    }

    /// 持久化用的字符串形式.
    fn to_field(&self) -> &str {
        self.path().unwrap_or(MISSING_SENTINEL)
    }

    fn from_field(s: &str) -> Self {
        if s == MISSING_SENTINEL {
            Cell::Missing
        } else {
            Cell::Path(s.to_owned())
        }
    }
}

/// 索引表中的一行 (一个样本).
#[derive(Debug, Clone)]
pub struct IndexRow {
    /// 所属受试者.
    pub subject: String,

    /// 与列名平行的单元格.
    pub cells: Vec<Cell>,

    /// 数据集首维上的切片选择子. 下标是保留切片的原切片号;
    /// 数据集保存全部切片, 原切片号可直接寻址首维.
    pub slices: SliceSel,
}

/// 样本索引表.
#[derive(Debug, Clone, Default)]
pub struct SampleIndex {
    columns: Vec<String>,
    rows: Vec<IndexRow>,
}

impl SampleIndex {
    /// 扫描容器建表.
    ///
    /// 列顺序固定: 输入模态列, `gt/<后缀>` 列, `roi/<后缀>` 列
    /// (无 ROI 后缀时保留一个恒缺失的 `roi` 占位列).
    /// `Dim::D2` 时每个保留切片展开为一行, `Dim::D3` 时每受试者一行.
    pub fn build(
        container: &Hdf5Container,
        contrasts: &[String],
        gt_suffixes: &[String],
        roi_suffixes: &[String],
        dim: Dim,
    ) -> Result<Self> {
        let mut columns: Vec<String> = contrasts.to_vec();
        columns.extend(gt_suffixes.iter().map(|s| format!("{NS_GT}/{s}")));
        if roi_suffixes.is_empty() {
            columns.push(NS_ROI.to_owned());
        } else {
            columns.extend(roi_suffixes.iter().map(|s| format!("{NS_ROI}/{s}")));
        }

        let mut rows = Vec::new();
        for subject in container.patients()? {
            let mut cells = Vec::with_capacity(columns.len());
            for ct in contrasts {
                cells.push(Self::cell_for(container, &subject, NS_INPUTS, ct)?);
            }
            for s in gt_suffixes {
                cells.push(Self::cell_for(container, &subject, NS_GT, s)?);
            }
            if roi_suffixes.is_empty() {
                cells.push(Cell::Missing);
            } else {
                for s in roi_suffixes {
                    cells.push(Self::cell_for(container, &subject, NS_ROI, s)?);
                }
            }

            let retained = container.slices(&subject)?;
            match dim {
                Dim::D3 => rows.push(IndexRow {
                    subject: subject.clone(),
                    cells,
                    slices: SliceSel::All(retained),
                }),
                Dim::D2 => {
                    for s in retained {
                        rows.push(IndexRow {
                            subject: subject.clone(),
                            cells: cells.clone(),
                            slices: SliceSel::One(s),
                        });
                    }
                }
            }
        }
        debug!("索引建表完成: {} 行 × {} 列", rows.len(), columns.len());
        Ok(Self { columns, rows })
    }

    /// 数据集对应的单元格: 不存在或零长度都按缺失处理.
    fn cell_for(container: &Hdf5Container, subject: &str, ns: &str, token: &str) -> Result<Cell> {
        if !container.dataset_exists(subject, ns, token) {
            return Ok(Cell::Missing);
        }
        let key = Hdf5Container::path_key(subject, ns, token);
        if container.dataset_len(&key)? == 0 {
            return Ok(Cell::Missing);
        }
        Ok(Cell::Path(key))
    }

    /// 列名.
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// 行数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 表是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 所有行.
    #[inline]
    pub fn rows(&self) -> &[IndexRow] {
        &self.rows
    }

    /// 第 `i` 行. 越界时 panic.
    #[inline]
    pub fn row(&self, i: usize) -> &IndexRow {
        &self.rows[i]
    }

    /// 列名 → 列下标.
    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// 删除在任一给定列上缺失的行. 返回删除的行数.
    pub fn clean(&mut self, columns: &[String]) -> usize {
        let idx: Vec<usize> = columns.iter().filter_map(|c| self.col_index(c)).collect();
        let before = self.rows.len();
        self.rows
            .retain(|r| idx.iter().all(|&i| r.cells[i] != Cell::Missing));
        before - self.rows.len()
    }

    /// 打乱行序.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.rows.shuffle(rng);
    }

    /// 把第 `row` 行 `col` 列的单元格提升为内存驻留.
    /// 缺失单元格保持缺失.
    pub fn promote(&mut self, row: usize, col: usize, data: ArrayD<f32>) {
        let cell = &mut self.rows[row].cells[col];
        if let Some(path) = cell.path() {
            *cell = Cell::Resident {
                path: path.to_owned(),
                data,
            };
        }
    }

    /// 保存为 CSV. 驻留数据不落盘, 只写路径键.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = csv::Writer::from_path(path.as_ref())?;
        let mut header = vec!["Subjects".to_owned()];
        header.extend(self.columns.iter().cloned());
        header.push("Slices".to_owned());
        w.write_record(&header)?;

        for row in &self.rows {
            let mut rec = vec![row.subject.clone()];
            rec.extend(row.cells.iter().map(|c| c.to_field().to_owned()));
            rec.push(match &row.slices {
                SliceSel::One(i) => i.to_string(),
                SliceSel::All(v) => {
                    format!("[{}]", v.iter().map(usize::to_string).collect::<Vec<_>>().join(", "))
                }
            });
            w.write_record(&rec)?;
        }
        w.flush()?;
        Ok(())
    }

    /// 优先从 CSV 装载索引表, 文件缺失或损坏时告警并回退到
    /// 扫描容器重建.
    pub fn load_or_build<P: AsRef<Path>>(
        csv_path: P,
        container: &Hdf5Container,
        contrasts: &[String],
        gt_suffixes: &[String],
        roi_suffixes: &[String],
        dim: Dim,
    ) -> Result<Self> {
        let csv_path = csv_path.as_ref();
        if csv_path.is_file() {
            match Self::load(csv_path) {
                Ok(idx) => return Ok(idx),
                Err(e) => warn!("索引表 {} 读取失败, 回退到重建: {e}", csv_path.display()),
            }
        } else {
            debug!("索引表 {} 不存在, 从容器重建", csv_path.display());
        }
        Self::build(container, contrasts, gt_suffixes, roi_suffixes, dim)
    }

    /// 从 CSV 重建索引表.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut r = csv::Reader::from_path(path.as_ref())?;
        let header = r.headers()?.clone();
        if header.len() < 2 {
            return Err(Error::MalformedCell(format!(
                "索引 CSV 表头至少需要 2 列, 实得 {}",
                header.len()
            )));
        }
        let columns: Vec<String> = header
            .iter()
            .skip(1)
            .take(header.len() - 2)
            .map(str::to_owned)
            .collect();

        let mut rows = Vec::new();
        for record in r.records() {
            let record = record?;
            let subject = record
                .get(0)
                .ok_or_else(|| Error::MalformedCell("行缺受试者列".to_owned()))?
                .to_owned();
            let cells = (1..=columns.len())
                .map(|i| Cell::from_field(record.get(i).unwrap_or(MISSING_SENTINEL)))
                .collect();
            let slices_field = record
                .get(columns.len() + 1)
                .ok_or_else(|| Error::MalformedCell(format!("行 {subject} 缺 Slices 列")))?;
            rows.push(IndexRow {
                subject,
                cells,
                slices: parse_slices(slices_field)?,
            });
        }
        Ok(Self { columns, rows })
    }
}

/// 解析 `Slices` 字段: `[0, 1, 2]` 形式为列表, 裸数字为单切片.
fn parse_slices(s: &str) -> Result<SliceSel> {
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let inner = inner.trim();
        if inner.is_empty() {
            return Ok(SliceSel::All(vec![]));
        }
        let v = inner
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .map_err(|_| Error::MalformedCell(format!("非法切片列表 `{s}`")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SliceSel::All(v))
    } else {
        s.parse::<usize>()
            .map(SliceSel::One)
            .map_err(|_| Error::MalformedCell(format!("非法切片下标 `{s}`")))
    }
}
