//! ### English
//! Deferred release of transport resources across resizes.
//!
//! ### 中文
//! 跨 resize 的传输资源延迟释放。

/// ### English
/// Tracks the current transport generation and the resources of older generations still
/// waiting to be released.
///
/// Release rule: a resource retired at generation `N` is released only when
/// [`painted`](Self::painted) reports a successful write into a generation `> N`.
///
/// ### 中文
/// 跟踪当前传输代数，以及仍在等待释放的旧代资源。
///
/// 释放规则：在第 `N` 代退役的资源，只有在 [`painted`](Self::painted) 报告对 `> N` 代的
/// 一次成功写入后才会被释放。
#[derive(Debug)]
pub struct GenerationLedger<T> {
    current: u32,
    retired: Vec<(u32, T)>,
}

impl<T> Default for GenerationLedger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GenerationLedger<T> {
    pub fn new() -> Self {
        Self {
            current: 1,
            retired: Vec::new(),
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// ### English
    /// Parks `old` (the resource of the current generation) and starts the next generation.
    ///
    /// ### 中文
    /// 暂存 `old`（当前代的资源）并开始下一代。
    pub fn advance(&mut self, old: T) -> u32 {
        self.retired.push((self.current, old));
        self.current = self.current.wrapping_add(1);
        self.current
    }

    /// ### English
    /// Records a successful write into `generation` and hands back everything now safe to drop.
    /// The caller drops them outside any lock.
    ///
    /// ### 中文
    /// 记录对 `generation` 的一次成功写入，并返回此时可以安全释放的全部资源。
    /// 调用方应在任何锁之外 drop 它们。
    pub fn painted(&mut self, generation: u32) -> Vec<T> {
        if self.retired.is_empty() {
            return Vec::new();
        }
        let (released, kept): (Vec<_>, Vec<_>) = self
            .retired
            .drain(..)
            .partition(|(retired_at, _)| *retired_at < generation);
        self.retired = kept;
        released.into_iter().map(|(_, resource)| resource).collect()
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// ### English
    /// Generations still parked, oldest first.
    ///
    /// ### 中文
    /// 仍被暂存的代数，按从旧到新排列。
    pub fn retired_generations(&self) -> Vec<u32> {
        self.retired.iter().map(|(generation, _)| *generation).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_only_after_newer_paint() {
        let mut ledger = GenerationLedger::new();
        assert_eq!(ledger.advance("gen1"), 2);
        assert!(ledger.painted(1).is_empty());
        assert_eq!(ledger.advance("gen2"), 3);
        assert_eq!(ledger.retired_generations(), vec![1, 2]);

        assert_eq!(ledger.painted(2), vec!["gen1"]);
        assert_eq!(ledger.painted(3), vec!["gen2"]);
        assert_eq!(ledger.retired_len(), 0);
    }
}
