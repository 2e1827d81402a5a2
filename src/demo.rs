//! A small reference [`crate::driver::Simulation`] standing in for the
//! out-of-scope instruction-set simulator. It reads a single 32-bit
//! symbolic input named `x`, branches on it three ways, and raises a
//! guest error on the input value that makes `100 / x` divide by zero —
//! enough surface to exercise every exploration outcome (normal
//! completion, `assume`, captured error) without a real ISS.

use anyhow::bail;

use crate::context::ExecutionContext;
use crate::driver::Simulation;
use crate::value::ConcolicValue;

pub struct BranchingDemo;

impl Simulation for BranchingDemo {
    fn run(&mut self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        let seed = ctx.current_store().get("x").map(|b| b.to_vec()).unwrap_or_else(|| vec![0; 4]);
        let x = ctx.solver().bvc(Some("x"), &seed);

        let zero = ConcolicValue::from_const(0, 32);
        let ten = ConcolicValue::from_const(10, 32);

        let is_zero = x.equal(&zero);
        if is_zero.concrete == 1 {
            ctx.trace_mut().add(true, &is_zero, 1);
            return Ok(());
        }
        ctx.trace_mut().add(false, &is_zero, 1);

        if x.concrete == 7 {
            bail!("guest assumption violated: x == 7");
        }
        // Propagated via `From`, not `.context()`: the driver tells an
        // assume-notification apart from a real guest error by
        // downcasting to the concrete `AssumeNotification` type, which
        // `.context()` would hide behind an opaque wrapper.
        ctx.trace_mut().assume(&x.not_equal(&ConcolicValue::from_const(7, 32)))?;

        let under_ten = x.ult(&ten);
        if under_ten.concrete == 1 {
            ctx.trace_mut().add(true, &under_ten, 2);
            let hundred = ConcolicValue::from_const(100, 32);
            if x.concrete == 0 {
                bail!("division by zero: x was {}", x.concrete);
            }
            let _ = hundred.udiv(&x);
            return Ok(());
        }
        ctx.trace_mut().add(false, &under_ten, 2);
        Ok(())
    }
}
