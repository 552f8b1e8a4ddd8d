use crate::transport::Address;
use std::fmt;
use std::sync::Arc;

#[derive(Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub(crate) struct Term(u64);

impl Term {
    pub(crate) fn new(term: u64) -> Self {
        Term(term)
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PersistentLocalState holds the term and vote, which must outlive any single election for the
/// protocol to be safe. A member must never vote twice in a term, even across a restart.
///
/// Store methods are compare-and-set: they return true iff they mutated state.
pub(crate) trait PersistentLocalState {
    /// Moves to `new_term` iff it's larger than the current term, forgetting the vote.
    fn store_term_if_increased(&mut self, new_term: Term) -> bool;

    /// Records `vote` iff the current term is `expected_current_term` and no vote was cast in it.
    fn store_vote_for_term_if_unvoted(&mut self, expected_current_term: Term, vote: Address) -> bool;

    /// Starts a new term with a vote for ourselves. Returns the new term.
    fn increment_term_and_vote_for_self(&mut self) -> Term;

    fn current_term(&self) -> Term;
    fn voted_for_current_term(&self) -> (Term, Option<Arc<Address>>);
}

/// VolatileLocalState keeps the term and vote in memory, alongside the in-memory log. A member
/// that restarts comes back as a new member and has to join again.
pub(super) struct VolatileLocalState {
    term: Term,
    vote: Option<Arc<Address>>,
    me: Arc<Address>,
}

impl VolatileLocalState {
    pub(super) fn new(my_address: Address) -> Self {
        VolatileLocalState {
            term: Term::new(0),
            vote: None,
            me: Arc::new(my_address),
        }
    }
}

impl PersistentLocalState for VolatileLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> bool {
        if new_term <= self.term {
            return false;
        }
        self.term = new_term;
        self.vote = None;
        true
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: Address) -> bool {
        if expected_term != self.term || self.vote.is_some() {
            return false;
        }
        self.vote = Some(Arc::new(vote));
        true
    }

    fn increment_term_and_vote_for_self(&mut self) -> Term {
        self.term.incr();
        self.vote = Some(self.me.clone());
        self.term
    }

    fn current_term(&self) -> Term {
        self.term
    }

    fn voted_for_current_term(&self) -> (Term, Option<Arc<Address>>) {
        (self.term, self.vote.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_vote_per_term() {
        let mut state = VolatileLocalState::new(Address::new("me"));
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), Address::new("a")));

        assert!(state.store_term_if_increased(Term::new(1)));
        assert!(state.store_vote_for_term_if_unvoted(Term::new(1), Address::new("a")));
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), Address::new("b")));
        let (term, vote) = state.voted_for_current_term();
        assert_eq!(term, Term::new(1));
        assert_eq!(vote.as_deref(), Some(&Address::new("a")));

        // Moving to a new term forgets the vote, and terms never go backwards.
        assert!(state.store_term_if_increased(Term::new(3)));
        assert!(!state.store_term_if_increased(Term::new(2)));
        assert_eq!(state.voted_for_current_term(), (Term::new(3), None));
    }

    #[test]
    fn candidates_vote_for_themselves() {
        let mut state = VolatileLocalState::new(Address::new("me"));
        assert!(state.store_term_if_increased(Term::new(4)));

        assert_eq!(state.increment_term_and_vote_for_self(), Term::new(5));
        assert_eq!(state.current_term(), Term::new(5));
        assert_eq!(state.voted_for_current_term().1.as_deref(), Some(&Address::new("me")));
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(5), Address::new("a")));
    }
}
