//! Record storage: an in-memory table plus paging controls.

mod page;
mod table;

pub use page::{Page, PageRequest, Sort, SortDirection, DEFAULT_PAGE_SIZE};
pub use table::RecordTable;
