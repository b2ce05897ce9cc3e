pub mod address_space;
pub mod constants;
pub mod error;
pub mod executable;
pub mod io;
pub mod logging;
pub mod memory;
pub mod policy;
pub mod translation;
pub mod vm_manager;

// Re-export commonly used items for convenience
pub use constants::*;
pub use error::{VmError, VmResult};
pub use policy::PolicyKind;
pub use translation::{TranslationEntry, TranslationResult, VirtualAddress};
pub use vm_manager::{MachineConfig, Statistics, VmManager};
