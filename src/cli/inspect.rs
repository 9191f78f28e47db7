use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use serde::Serialize;

use crate::FeatureArchive;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct InspectCommand {
    /// 特征文件路径
    pub path: PathBuf,
    /// 显示该标识符对应特征的统计信息
    #[arg(long, value_name = "ID")]
    pub id: Option<i32>,
    /// 显示的标识符数量
    #[arg(long, value_name = "COUNT", default_value_t = 10)]
    pub head: usize,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Serialize)]
struct Report {
    rows: usize,
    shape: [usize; 3],
    ids: Vec<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    row: Option<RowStats>,
}

#[derive(Debug, Serialize)]
struct RowStats {
    id: i32,
    index: usize,
    min: f32,
    max: f32,
    mean: f32,
}

impl SubCommandExtend for InspectCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let archive = FeatureArchive::open(&self.path)?;
        let (c, h, w) = archive.feature_shape();

        let row = match self.id {
            Some(id) => {
                let index = archive.position(id).ok_or_else(|| anyhow!("标识符 {} 不存在", id))?;
                let values = archive.features().index_axis(ndarray::Axis(0), index).mapv(f32::from);
                Some(RowStats {
                    id,
                    index,
                    min: values.fold(f32::INFINITY, |a, &b| a.min(b)),
                    max: values.fold(f32::NEG_INFINITY, |a, &b| a.max(b)),
                    mean: values.mean().unwrap_or(f32::NAN),
                })
            }
            None => None,
        };

        let report = Report {
            rows: archive.len(),
            shape: [c, h, w],
            ids: archive.ids().iter().take(self.head).copied().collect(),
            row,
        };
        print_report(&report, self.output_format)
    }
}

fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?)
        }
        OutputFormat::Table => {
            println!("rows\t{}", report.rows);
            println!("shape\t{:?}", report.shape);
            println!("ids\t{:?}", report.ids);
            if let Some(row) = &report.row {
                println!("id\t{}\nindex\t{}", row.id, row.index);
                println!("min\t{:.4}\nmax\t{:.4}\nmean\t{:.4}", row.min, row.max, row.mean);
            }
        }
    }
    Ok(())
}
