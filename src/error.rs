// Copyright © The Slate Developers. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! User-visible kernel errors.
//!
//! Only failures a correct user program can provoke are represented
//! here; violations of kernel-internal contracts (sleeping with
//! interrupts enabled, exhausting the thread table) abort the
//! simulation instead of returning an error.

use alloc::string::ToString;

use custom_error::custom_error;

use crate::threads::Pid;

custom_error! {
    #[derive(PartialEq, Eq, Clone)]
    pub KError
    UnknownPid{pid: Pid} = "No thread was ever assigned pid {pid}.",
    NotAChild{pid: Pid} = "Thread {pid} is not a child of the caller.",
}
