//! Row copying between a sealed table and a new builder.

use tabflow_table::{TableBuilder, TableView};

use crate::traits::OpError;

/// Copy `rows` of the source columns listed in `mapping` (`(src, dst)`
/// column index pairs) into `out`.
pub(crate) fn copy_rows(
    view: &TableView<'_>,
    out: &mut TableBuilder,
    mapping: &[(usize, usize)],
    rows: impl IntoIterator<Item = usize>,
) -> Result<(), OpError> {
    for row in rows {
        for &(src, dst) in mapping {
            out.append_value(dst, view.value(row, src))?;
        }
    }
    Ok(())
}
