/// Builder-style script ergonomics mixin carried over from the original's
/// `Configurable.configure` (`SPEC_FULL.md §C.2`): runs a closure with
/// `self` as the argument, so a script host can write
/// `project.task("x").configure(|t| { ... })`-shaped code against whichever
/// type implements this trait.
pub trait Configurable {
    fn configure(&mut self, f: impl FnOnce(&mut Self)) -> &mut Self {
        f(self);
        self
    }
}
