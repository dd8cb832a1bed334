use crate::common_io::{read_lines_of_types, write_lines};
use crate::traits::IoOps;
pub use nalgebra::{DMatrix, DVector};

use std::fmt::Display;
use std::str::FromStr;

impl<T> IoOps for DMatrix<T>
where
    T: nalgebra::Scalar + Send + FromStr + Display + Copy,
    <T as FromStr>::Err: Display,
{
    type Scalar = T;
    type Mat = Self;

    fn read_file_delim(
        file: &str,
        delim: &str,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let hdr_line = skip.map_or(-1, |k| k as i64);
        let rows = read_lines_of_types::<T>(file, delim, hdr_line)?.lines;

        let Some(first) = rows.first() else {
            anyhow::bail!("{}: no numeric rows", file);
        };
        let (nrows, ncols) = (rows.len(), first.len());

        if let Some(i) = rows.iter().position(|row| row.len() != ncols) {
            anyhow::bail!(
                "{}: row {} has {} columns, expected {}",
                file,
                i,
                rows[i].len(),
                ncols
            );
        }

        Ok(DMatrix::from_row_iterator(
            nrows,
            ncols,
            rows.into_iter().flatten(),
        ))
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()> {
        let lines: Vec<String> = self
            .row_iter()
            .map(|row| {
                let fields: Vec<String> = row.iter().map(|x| x.to_string()).collect();
                fields.join(delim)
            })
            .collect();
        write_lines(&lines, file)
    }
}
