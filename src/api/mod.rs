//! Response shapes shared by all portals: paginated lists, data-table
//! payloads and small status responses.

pub mod datatable;
pub mod pagination;
pub mod response;

pub use datatable::{DataTableParams, DataTableResponse};
pub use pagination::{Paginated, PaginationParams};
pub use response::{Created, DataResponse, MessageResponse};
