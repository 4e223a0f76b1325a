//! 外部可组合变换栈的调用契约.
//!
//! 几何/数值变换管线本身不属于本 crate, 这里只规定调用接口:
//! 每次取样时变换栈被调用三次, 固定顺序为 roi → im → gt,
//! 且每个阶段产出的元信息 (尤其是 ROI 裁剪参数) 会传入下一阶段.

use ndarray::ArrayD;

use crate::meta::{Role, SampleMetadata};

/// 变换阶段契约.
///
/// 输入为每通道样本列表与平行的元信息列表, 输出同构.
/// 实现必须接受空输入并返回空输出, 以表达 gt/roi 缺失的合法状态.
pub trait TransformStage {
    /// 对 `samples` 应用 `role` 对应的变换子集.
    fn apply(
        &self,
        samples: Vec<ArrayD<f32>>,
        metadata: Vec<SampleMetadata>,
        role: Role,
    ) -> (Vec<ArrayD<f32>>, Vec<SampleMetadata>);
}

/// 恒等变换. 原样返回样本与元信息.
#[derive(Copy, Clone, Debug, Default)]
pub struct Identity;

impl TransformStage for Identity {
    #[inline]
    fn apply(
        &self,
        samples: Vec<ArrayD<f32>>,
        metadata: Vec<SampleMetadata>,
        _role: Role,
    ) -> (Vec<ArrayD<f32>>, Vec<SampleMetadata>) {
        (samples, metadata)
    }
}

/// 切片保留谓词. 在转换时逐切片求值, 决定该切片下标是否计入
/// 受试者组的 `slices` 属性.
#[derive(Copy, Clone, Debug)]
pub struct SliceFilter {
    /// 丢弃所有输入通道全零的切片.
    pub filter_empty_input: bool,

    /// 丢弃任一 gt 通道全零的切片.
    pub filter_empty_mask: bool,
}

impl Default for SliceFilter {
    fn default() -> Self {
        Self {
            filter_empty_input: true,
            filter_empty_mask: false,
        }
    }
}

impl SliceFilter {
    /// 当前激活的谓词名, 写入容器顶层 `slice_filter_fn` 属性.
    pub fn names(&self) -> Vec<String> {
        let mut v = Vec::new();
        if self.filter_empty_input {
            v.push("filter_empty_input".to_owned());
        }
        if self.filter_empty_mask {
            v.push("filter_empty_mask".to_owned());
        }
        v
    }

    /// 判断 (已变换的) 切片样本是否保留.
    pub fn keep(&self, inputs: &[ArrayD<f32>], gts: &[ArrayD<f32>]) -> bool {
        if self.filter_empty_input && inputs.iter().any(|a| a.iter().all(|v| *v == 0.0)) {
            return false;
        }
        if self.filter_empty_mask && gts.iter().any(|a| a.iter().all(|v| *v == 0.0)) {
            return false;
        }
        true
    }
}

/// 将上一阶段元信息中的裁剪参数与包围盒传播给下一阶段.
///
/// 以 `src` 的首个元信息为准, 仅补充 `dst` 中尚未出现的键,
/// 已有键不被覆盖.
pub fn update_metadata(src: &[SampleMetadata], dst: &mut [SampleMetadata]) {
    let Some(first) = src.first() else {
        return;
    };
    for m in dst.iter_mut() {
        for (k, v) in &first.crop_params {
            m.crop_params.entry(k.clone()).or_insert_with(|| v.clone());
        }
        if m.bounding_box.is_none() {
            m.bounding_box = first.bounding_box;
        }
    }
}
