//! Grid identity registry.
//!
//! Every registered grid is split into canonical sub-grids by role
//! (horizontal 2-D, vertical 1-D, time 1-D, tracer 1-D). Grids of different
//! components are compared through their sub-grid structure and through
//! order-independent checksums of the horizontal coordinates, so no
//! coordinate arrays travel between components on a comparison.

pub mod catalogue;
pub mod ensemble;
pub mod entity;
pub mod equality;
pub mod exchange;
pub mod h2d;
pub mod levels;
pub mod queries;
pub mod register;
pub mod roles;
pub mod validation;

pub use catalogue::GridCatalogue;
pub use ensemble::PromotionStage;
pub use entity::{AttachedField, BottomVariation, Grid, LevelVariation};
pub use exchange::{FileRendezvous, GridExchangeRecord, GridRendezvous, MailboxRendezvous};
pub use h2d::{H2dDims, H2dGridSpec, LocalH2dSpec};
pub use register::GridOptions;
pub use roles::{Role, RoleSlots};
