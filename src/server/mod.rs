//! HTTP server layer: the remote call boundary of the scanner session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                    HTTP Layer                    │
//! │  ┌──────────┐  ┌──────────┐  ┌────────────────┐  │
//! │  │ handlers │  │  routes  │  │   operations   │  │
//! │  └──────────┘  └──────────┘  └────────────────┘  │
//! └────────────────────────┬─────────────────────────┘
//!                          ▼
//!                   ScannerSession
//! ```

pub mod handlers;
pub mod operations;
pub mod routes;

pub use handlers::{
    AppState, ErrorResponse, HandleListResponse, HandleResponse, HealthResponse,
    OperationCreatedResponse, STL_CONTENT_TYPE,
};
pub use operations::OperationTable;
pub use routes::{create_router, create_router_with_state, RouterConfig};
