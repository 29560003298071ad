//! Stack + machine-context primitives.
//!
//! `spec.md` §9 treats context switching as an abstract `ctx_switch(old,
//! new)` primitive and notes the real implementation "is inherently
//! platform-specific and often requires inline assembly... only the
//! scheduler calls these; user code never does." This module is that one
//! concrete implementation (x86_64/System V), grounded on the teacher's own
//! riscv64 `TaskContext`/`switch_context`/`thread_wrapper` trio
//! (`exercises/04_context_switch/{01_stack_coroutine,02_green_threads}`) and
//! generalized to x86_64 using the same callee-saved-register save/restore
//! shape shown in the pack's `stackful-coroutine` example. A non-x86_64
//! build fails fast rather than silently producing a broken runtime.
//!
//! Only the scheduler (`scheduler.rs`) and the worker pool (`worker.rs`)
//! call into this module.

use crate::config::STACKGUARD_MAGIC;
use std::alloc::{alloc, dealloc, Layout};
use std::cell::RefCell;

/// Saved callee-saved registers for one suspended execution.
///
/// Field order must match the offsets baked into the assembly in
/// `arch::rt_switch_context` below: `rsp` at 0x00, then `r15`..`rbp` at
/// 0x08..0x30.
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct Context {
    rsp: u64,
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
}

impl Context {
    pub(crate) fn empty() -> Self {
        Self::default()
    }
}

#[cfg(target_arch = "x86_64")]
mod arch {
    use super::Context;

    std::arch::global_asm!(
        ".global rt_switch_context",
        "rt_switch_context:",
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], r15",
        "mov [rdi + 0x10], r14",
        "mov [rdi + 0x18], r13",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], rbx",
        "mov [rdi + 0x30], rbp",
        "mov rsp, [rsi + 0x00]",
        "mov r15, [rsi + 0x08]",
        "mov r14, [rsi + 0x10]",
        "mov r13, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov rbx, [rsi + 0x28]",
        "mov rbp, [rsi + 0x30]",
        "ret",
    );

    extern "C" {
        pub(super) fn rt_switch_context(old: *mut Context, new: *const Context);
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod arch {
    use super::Context;

    pub(super) unsafe fn rt_switch_context(_old: *mut Context, _new: *const Context) {
        compile_error!("green_runtime's context switch is implemented for x86_64 only");
    }
}

/// Save the caller's register state into `old`, restore `new`'s, and resume
/// there. Never "returns" in the usual sense: the next thing that runs on
/// this kernel thread's stack is whatever was executing at `new`'s last
/// `switch_context` call (or the trampoline, the first time `new` runs).
///
/// # Safety
/// `old` and `new` must be distinct, live `Context`s each paired with a
/// stack that is not concurrently in use by anyone else.
pub(crate) unsafe fn switch_context(old: *mut Context, new: *const Context) {
    arch::rt_switch_context(old, new);
}

/// A green thread's stack, with the low-address guard word `spec.md` §4.2
/// specifies ("stackguard sentinel... magic word at the stack's low
/// address; scheduler checks it on each return").
pub(crate) struct Stack {
    /// `None` for the main thread, which reuses the OS-provided stack.
    buf: Option<*mut u8>,
    layout: Option<Layout>,
    low: usize,
    high: usize,
    loaned: bool,
}

unsafe impl Send for Stack {}

impl Stack {
    /// The main thread: stacksize 0, no allocation, no guard (spec.md §4.2).
    pub(crate) fn main_thread() -> Self {
        Self {
            buf: None,
            layout: None,
            low: 0,
            high: 0,
            loaned: true,
        }
    }

    /// `stackaddr` takes precedence and is never freed on drop ("loaned").
    ///
    /// Returns `None` on allocator exhaustion rather than aborting the
    /// process (`spec.md` §4.7's `spawn` can fail with `OutOfMemory`); a bad
    /// `size`/alignment combination is still a caller bug, not a runtime
    /// condition, so that case keeps panicking via `Layout`'s own `expect`.
    pub(crate) fn alloc(size: usize, stackaddr: Option<(usize, usize)>) -> Option<Self> {
        if let Some((low, high)) = stackaddr {
            return Some(Self {
                buf: None,
                layout: None,
                low,
                high,
                loaned: true,
            });
        }
        let size = size.max(crate::config::STACK_SIZE_FLOOR);
        let layout = Layout::from_size_align(size, 16).expect("bad stack layout");
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return None;
        }
        let low = ptr as usize;
        let high = low + size;
        unsafe {
            std::ptr::write_unaligned(low as *mut u64, STACKGUARD_MAGIC);
        }
        Some(Self {
            buf: Some(ptr),
            layout: Some(layout),
            low,
            high,
            loaned: false,
        })
    }

    pub(crate) fn top(&self) -> usize {
        self.high
    }

    /// `*current.stackguard != 0xDEAD` check in spec.md §4.5 step 7.
    pub(crate) fn guard_intact(&self) -> bool {
        if self.buf.is_none() {
            return true;
        }
        unsafe { std::ptr::read_unaligned(self.low as *const u64) == STACKGUARD_MAGIC }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if self.loaned {
            return;
        }
        if let (Some(ptr), Some(layout)) = (self.buf, self.layout) {
            unsafe { dealloc(ptr, layout) };
        }
    }
}

/// First-dispatch entry point: the boxed user closure to run, plus the
/// scheduler-supplied finish callback that plays the role of `exit(v)`.
pub(crate) type ThreadThunk = Box<dyn FnOnce() + Send>;

thread_local! {
    /// Set by the scheduler immediately before switching into a thread that
    /// has never run before; consumed once by `rt_trampoline`. Mirrors the
    /// teacher's `static mut CURRENT_THREAD_ENTRY`, made thread-local and
    /// `RefCell`-guarded since the same kernel thread may be a worker
    /// resuming a handed-out green thread as easily as it may be the
    /// scheduler dispatching a brand-new one.
    static PENDING_ENTRY: RefCell<Option<ThreadThunk>> = const { RefCell::new(None) };
}

pub(crate) fn set_pending_entry(thunk: ThreadThunk) {
    PENDING_ENTRY.with(|cell| {
        let prev = cell.borrow_mut().replace(thunk);
        debug_assert!(prev.is_none(), "pending entry overwritten before it ran");
    });
}

/// The first code a new green thread's stack ever runs. Calls the pending
/// thunk (which itself is responsible for calling back into `exit()` when
/// the user function returns) and should never fall through.
extern "C" fn rt_trampoline() -> ! {
    let thunk = PENDING_ENTRY.with(|cell| cell.borrow_mut().take());
    if let Some(thunk) = thunk {
        thunk();
    }
    log::error!("thread trampoline fell through without calling exit(); this is a runtime bug");
    loop {
        std::hint::spin_loop();
    }
}

/// Build a fresh `Context` whose first resumption jumps into
/// `rt_trampoline` with a 16-byte-aligned, ABI-correct stack.
pub(crate) fn make_context(stack: &Stack) -> Context {
    let top = stack.top();
    let sp = (top - 8) & !0xF;
    unsafe {
        std::ptr::write_unaligned(sp as *mut u64, rt_trampoline as usize as u64);
    }
    Context {
        rsp: sp as u64,
        ..Context::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn stack_guard_survives_until_corrupted() {
        let stack = Stack::alloc(crate::config::STACK_SIZE_FLOOR, None).unwrap();
        assert!(stack.guard_intact());
        unsafe {
            std::ptr::write_unaligned(stack.low as *mut u64, 0);
        }
        assert!(!stack.guard_intact());
    }

    #[test]
    fn switch_context_runs_the_other_stack_and_returns() {
        static FLAG: AtomicU32 = AtomicU32::new(0);
        static mut MAIN_CTX_PTR: *mut Context = std::ptr::null_mut();
        static mut CHILD_CTX_PTR: *mut Context = std::ptr::null_mut();

        extern "C" fn child_entry() -> ! {
            FLAG.store(42, Ordering::SeqCst);
            unsafe { switch_context(CHILD_CTX_PTR, &*MAIN_CTX_PTR) };
            unreachable!("main never switches back into a finished test fixture");
        }

        let stack = Stack::alloc(crate::config::STACK_SIZE_DEFAULT, None).unwrap();
        let top = stack.top();
        let sp = (top - 8) & !0xF;
        unsafe {
            std::ptr::write_unaligned(sp as *mut u64, child_entry as usize as u64);
        }
        let mut child_ctx = Context {
            rsp: sp as u64,
            ..Context::empty()
        };
        let mut main_ctx = Context::empty();

        unsafe {
            MAIN_CTX_PTR = &mut main_ctx;
            CHILD_CTX_PTR = &mut child_ctx;
            switch_context(&mut main_ctx, &child_ctx);
        }

        assert_eq!(FLAG.load(Ordering::SeqCst), 42);
    }
}
