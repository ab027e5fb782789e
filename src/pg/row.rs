use crate::pg::codec::ColumnDesc;

/// One result row; values stay as the text-format bytes they arrived in.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<ColumnDesc>,
    values: Vec<Option<Vec<u8>>>,
}

impl Row {
    pub fn new(columns: Vec<ColumnDesc>, values: Vec<Option<Vec<u8>>>) -> Self {
        Self { columns, values }
    }

    /// Text value of column `idx`; None for SQL NULL or out of range.
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.values
            .get(idx)?
            .as_deref()
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn get_by_name(&self, name: &str) -> Option<&str> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))?;
        self.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::new(
            vec![
                ColumnDesc {
                    name: "username".to_string(),
                },
                ColumnDesc {
                    name: "passwd".to_string(),
                },
            ],
            vec![Some(b"ann".to_vec()), None],
        )
    }

    #[test]
    fn access_by_index_and_name() {
        let r = row();
        assert_eq!(r.get(0), Some("ann"));
        assert_eq!(r.get(1), None);
        assert_eq!(r.get(2), None);
        assert_eq!(r.get_by_name("USERNAME"), Some("ann"));
        assert_eq!(r.get_by_name("missing"), None);
    }
}
