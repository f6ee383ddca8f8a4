use crate::task::{Continuation, SharedContinuation, Task};
use either::Either;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Runs `f` on every item in order, starting each task only after the previous
/// one succeeded. The first failure stops the iteration and is propagated.
pub fn foreach<I, F>(items: I, mut f: F) -> Task<()>
where
    I: IntoIterator + 'static,
    I::IntoIter: 'static,
    F: FnMut(I::Item) -> Task<()> + 'static,
{
    Task::new(move |pass, fail| {
        let mut items = items.into_iter();
        sequence(move || items.next().map(&mut f)).run_with(Continuation::new(pass, fail));
    })
}

/// Runs the tasks produced by `next` one after another until it returns
/// `None`. The first failure stops the sequence.
///
/// Steps resolving synchronously are driven by a loop, so the stack does not
/// grow with the number of steps.
pub(crate) fn sequence<N>(next: N) -> Task<()>
where
    N: FnMut() -> Option<Task<()>> + 'static,
{
    Task::new(move |pass, fail| {
        drive(Rc::new(Sequence {
            next: RefCell::new(next),
            k: Cell::new(Some(Continuation::new(pass, fail))),
            driving: Cell::new(false),
            resolved: Cell::new(false),
        }));
    })
}

struct Sequence<N> {
    next: RefCell<N>,
    k: Cell<Option<Continuation<()>>>,

    /// `drive` is on the stack.
    driving: Cell<bool>,

    /// The current step succeeded while `drive` was on the stack.
    resolved: Cell<bool>,
}

fn drive<N>(seq: Rc<Sequence<N>>)
where
    N: FnMut() -> Option<Task<()>> + 'static,
{
    seq.driving.set(true);

    loop {
        let step = {
            let mut next = seq.next.borrow_mut();
            (&mut *next)()
        };

        let Some(task) = step else {
            seq.driving.set(false);
            if let Some(k) = seq.k.take() {
                k.succeed(());
            }
            return;
        };

        seq.resolved.set(false);
        let (on_pass, on_fail) = (Rc::clone(&seq), Rc::clone(&seq));

        task.run(
            move |()| {
                if on_pass.driving.get() {
                    on_pass.resolved.set(true);
                } else {
                    drive(on_pass);
                }
            },
            move |failure| {
                if let Some(k) = on_fail.k.take() {
                    k.fail(failure);
                }
            },
        );

        if !seq.resolved.get() {
            // Pending or failed: the step's continuation resumes the loop.
            seq.driving.set(false);
            return;
        }
    }
}

/// Runs both tasks and resolves with whichever finishes first, success or
/// failure. The other outcome is discarded when it arrives.
pub fn race<A, B>(left: Task<A>, right: Task<B>) -> Task<Either<A, B>>
where
    A: 'static,
    B: 'static,
{
    Task::new(move |pass, fail| {
        let k = SharedContinuation::new(Continuation::new(pass, fail));
        let (left_pass, left_fail, right_pass, right_fail) =
            (k.clone(), k.clone(), k.clone(), k);

        left.run(
            move |value| {
                if let Some(k) = left_pass.take() {
                    k.succeed(Either::Left(value));
                }
            },
            move |failure| {
                if let Some(k) = left_fail.take() {
                    k.fail(failure);
                }
            },
        );

        right.run(
            move |value| {
                if let Some(k) = right_pass.take() {
                    k.succeed(Either::Right(value));
                }
            },
            move |failure| {
                if let Some(k) = right_fail.take() {
                    k.fail(failure);
                }
            },
        );
    })
}
