use std::path::{Path, PathBuf};

use log::{debug, info};
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// 一张待提取特征的图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// 文件名中第一个 `.` 之前的部分，例如 `123.jpg` -> `123`
    pub id: String,
    pub path: PathBuf,
}

impl ImageRecord {
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let id = name.split('.').next()?.to_owned();
        Some(Self { id, path })
    }

    /// 特征文件中的 `ids` 为整数数组，因此标识符必须能被解析为 i32
    pub fn numeric_id(&self) -> Result<i32> {
        parse_identifier(&self.id)
            .ok_or_else(|| Error::InvalidIdentifier { id: self.id.clone(), path: self.path.clone() })
    }
}

pub fn parse_identifier(id: &str) -> Option<i32> {
    id.parse().ok()
}

/// 按路径排序的图片集合，构建后不再改变
///
/// 同一目录中两个文件得到相同标识符时 (如 `1.jpg` 和 `1.v2.jpg`)，两者都会保留，
/// 下游按标识符查找时的行为未定义。
#[derive(Debug, Clone)]
pub struct ImageCorpus {
    root: PathBuf,
    records: Vec<ImageRecord>,
}

impl ImageCorpus {
    /// 扫描目录 (不递归) 中后缀名匹配的文件
    pub fn scan(dir: impl AsRef<Path>, suffixes: &[String]) -> Result<Self> {
        let dir = dir.as_ref();
        let re_suf = suffix_regex(suffixes)?;

        info!("开始扫描目录: {}", dir.display());
        let mut records = vec![];
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            let Some(ext) = path.extension() else {
                continue;
            };
            if !re_suf.is_match(&ext.to_string_lossy()) {
                continue;
            }
            match ImageRecord::from_path(path) {
                Some(record) => records.push(record),
                None => debug!("跳过无法识别的文件名"),
            }
        }

        if records.is_empty() {
            return Err(Error::CorpusEmpty(dir.to_path_buf()));
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        info!("扫描完成，共 {} 张图片", records.len());

        Ok(Self { root: dir.to_path_buf(), records })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.id.as_str())
    }

    /// 在处理任何图片之前检查所有标识符
    pub fn numeric_ids(&self) -> Result<Vec<i32>> {
        self.records.iter().map(ImageRecord::numeric_id).collect()
    }
}

fn suffix_regex(suffixes: &[String]) -> Result<Regex> {
    let alternatives =
        suffixes.iter().map(|s| regex::escape(s.trim_start_matches('.'))).collect::<Vec<_>>();
    let re = format!("(?i)^({})$", alternatives.join("|"));
    Regex::new(&re).map_err(|e| Error::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), b"").unwrap();
        }
    }

    #[test]
    fn identifier_is_name_before_first_dot() {
        let record = ImageRecord::from_path(PathBuf::from("/data/images/123.jpg")).unwrap();
        assert_eq!(record.id, "123");
        assert_eq!(record.numeric_id().unwrap(), 123);

        let record = ImageRecord::from_path(PathBuf::from("a.b.jpg")).unwrap();
        assert_eq!(record.id, "a");
        assert!(matches!(record.numeric_id(), Err(Error::InvalidIdentifier { .. })));
    }

    #[test]
    fn scan_sorts_by_path_and_filters_suffix() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["2.jpg", "10.JPG", "1.jpg", "3.png", "notes.txt"]);
        fs::create_dir(dir.path().join("4.jpg")).unwrap();

        let corpus = ImageCorpus::scan(dir.path(), &["jpg".to_string()]).unwrap();
        // 按路径的字典序，而不是按数值
        assert_eq!(corpus.ids().collect::<Vec<_>>(), ["1", "10", "2"]);
        assert_eq!(corpus.numeric_ids().unwrap(), [1, 10, 2]);
    }

    #[test]
    fn scan_is_not_recursive() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub"), &["1.jpg"]);
        touch(dir.path(), &["2.jpg"]);

        let corpus = ImageCorpus::scan(dir.path(), &["jpg".to_string()]).unwrap();
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn multiple_suffixes() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["1.jpg", "2.jpeg", "3.png"]);

        let corpus = ImageCorpus::scan(dir.path(), &["jpg".into(), ".jpeg".into()]).unwrap();
        assert_eq!(corpus.len(), 2);
    }

    #[test]
    fn empty_directory() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &["readme.md"]);
        let err = ImageCorpus::scan(dir.path(), &["jpg".to_string()]).unwrap_err();
        assert!(matches!(err, Error::CorpusEmpty(_)));
    }

    #[test]
    fn missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = ImageCorpus::scan(dir.path().join("missing"), &["jpg".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Walk(_)));
    }
}
