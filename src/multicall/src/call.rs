use std::sync::Arc;

use ethers_core::abi::token::{LenientTokenizer, Tokenizer};
use ethers_core::abi::{self, Token};
use ethers_core::types::{Address, Bytes};

use crate::error::{MulticallError, Result};
use crate::signature::Signature;

/// One read-only contract call: target, signature and arguments.
///
/// The ABI encoded payload is computed once, at construction. Signature and
/// argument problems are reported here, before anything touches the network.
#[derive(Debug, Clone)]
pub struct Call {
    target: Address,
    signature: Arc<Signature>,
    args: Vec<Token>,
    data: Bytes,
}

impl Call {
    /// Builds a call from a `name(inputs)(outputs)` signature and typed arguments.
    pub fn new(target: Address, signature: &str, args: Vec<Token>) -> Result<Self> {
        Self::with_signature(target, Arc::new(Signature::parse(signature)?), args)
    }

    /// Builds a call from an already parsed signature, which can be shared between calls.
    pub fn with_signature(
        target: Address,
        signature: Arc<Signature>,
        args: Vec<Token>,
    ) -> Result<Self> {
        check_arguments(&signature, &args)?;

        let mut data = signature.selector().to_vec();
        data.extend(abi::encode(&args));

        Ok(Self {
            target,
            signature,
            args,
            data: data.into(),
        })
    }

    /// Builds a call from textual arguments, tokenized against the signature input types.
    ///
    /// Scalars are accepted loosely: `42` for a `uint256`, `true` for a `bool`,
    /// hex for addresses and bytes, `(1,true)` for tuples and `[1,2]` for arrays.
    pub fn parse(target: Address, signature: &str, args: &[&str]) -> Result<Self> {
        let signature = Signature::parse(signature)?;
        if args.len() != signature.inputs().len() {
            return Err(MulticallError::InvalidArguments(format!(
                "`{}` expects {} argument(s), got {}",
                signature.function(),
                signature.inputs().len(),
                args.len()
            )));
        }

        let tokens = signature
            .inputs()
            .iter()
            .zip(args)
            .map(|(param, value)| {
                LenientTokenizer::tokenize(param, value).map_err(|err| {
                    MulticallError::InvalidArguments(format!(
                        "cannot read `{value}` as {param}: {err}"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::with_signature(target, Arc::new(signature), tokens)
    }

    /// Contract the call is sent to.
    pub fn target(&self) -> Address {
        self.target
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn args(&self) -> &[Token] {
        &self.args
    }

    /// Selector followed by the ABI encoded arguments.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Decodes the raw return data of this call against its output types.
    ///
    /// A single output type yields that value, anything else yields a tuple.
    pub fn decode_output(&self, output: &[u8]) -> std::result::Result<Token, abi::Error> {
        let outputs = self.signature.outputs();
        let mut values = abi::decode(outputs, output)?;

        if outputs.len() == 1 {
            if let Some(value) = values.pop() {
                return Ok(value);
            }
        }
        Ok(Token::Tuple(values))
    }
}

fn check_arguments(signature: &Signature, args: &[Token]) -> Result<()> {
    let inputs = signature.inputs();
    if args.len() != inputs.len() {
        return Err(MulticallError::InvalidArguments(format!(
            "`{}` expects {} argument(s), got {}",
            signature.function(),
            inputs.len(),
            args.len()
        )));
    }

    if let Some((position, (arg, param))) = args
        .iter()
        .zip(inputs)
        .enumerate()
        .find(|(_, (arg, param))| !arg.type_check(param))
    {
        return Err(MulticallError::InvalidArguments(format!(
            "argument {position} of `{}` is not a {param}: {arg:?}",
            signature.function()
        )));
    }

    Ok(())
}
