//! Process model: PCB arena, program loader, `execute`/`halt`.

pub mod exec;
pub mod loader;
pub mod pcb;

pub use exec::{execute, halt};
pub use pcb::{
    current_pid, current_terminal, FileDescriptor, FileKind, Pcb, Pid, ARG_BUFFER_LEN,
    MAX_OPEN_FILES, MAX_TASKS,
};
