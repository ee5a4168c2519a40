//! Method-specific transaction behavior: CANCEL and PRACK.
//!
//! Both methods run in transactions of their own but act on another one, the
//! request being cancelled or the INVITE whose provisional response is being
//! acknowledged.

mod cancel;
mod prack;
