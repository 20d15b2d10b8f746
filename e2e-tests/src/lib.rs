//! End-to-end tests driving client and service swap servers over a shared in-memory chain.
