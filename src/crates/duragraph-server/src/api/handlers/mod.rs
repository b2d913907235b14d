//! API request handlers, grouped by resource

pub mod assistants;
pub mod health;
pub mod runs;
pub mod threads;
pub mod workers;

pub use assistants::{create_assistant, get_assistant, list_assistants};
pub use health::health;
pub use runs::{
    cancel_run, create_run, create_run_and_wait, delete_run, get_run, list_runs, resume_run,
    submit_tool_outputs,
};
pub use threads::{
    add_message, copy_thread, create_thread, delete_thread, get_thread, get_thread_state,
    thread_history, update_thread_state,
};
pub use workers::{
    deregister_worker, get_worker, get_worker_graph, list_workers, poll_tasks, register_worker,
    worker_event, worker_heartbeat,
};
