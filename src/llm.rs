//! LLM collaborator boundary.
//!
//! The host application provides the language model; the engine only needs a
//! stateless text-in/text-out call. Streaming is optional and degrades to a
//! single chunk.
//!
//! # Concurrency contract
//!
//! The collaborator is treated as **non-concurrent-safe**: the indexing
//! pipeline and the global query's map phase serialize their calls, and a
//! host must not invoke the same provider from two tasks at once. Each call
//! is stateless; providers that keep a session must clear it per call.

use crate::Result;

/// Boxed token stream returned by [`LlmProvider::generate_stream`].
pub type TokenStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// Trait for host-provided LLM generators.
pub trait LlmProvider: Send + Sync {
    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Collaborator`] if generation fails.
    fn generate(&self, prompt: &str) -> Result<String>;

    /// Generates a completion as a token stream.
    ///
    /// The default implementation yields the full [`Self::generate`] output
    /// as one chunk, so streaming call sites work against any provider.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Collaborator`] if generation fails.
    fn generate_stream(&self, prompt: &str) -> Result<TokenStream> {
        let full = self.generate(prompt)?;
        Ok(Box::new(std::iter::once(Ok(full))))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedLlm;
    use super::*;

    #[test]
    fn test_default_stream_is_single_chunk() {
        struct Fixed;
        impl LlmProvider for Fixed {
            fn generate(&self, _prompt: &str) -> Result<String> {
                Ok("hello world".to_string())
            }
        }

        let chunks: Vec<String> = Fixed
            .generate_stream("x")
            .and_then(Iterator::collect)
            .unwrap_or_default();
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_scripted_llm_sequence() {
        let llm = ScriptedLlm::new(vec!["one", "two"]);
        assert_eq!(llm.generate("a").unwrap_or_default(), "one");
        assert_eq!(llm.generate("b").unwrap_or_default(), "two");
        // Last response repeats.
        assert_eq!(llm.generate("c").unwrap_or_default(), "two");
    }
}
